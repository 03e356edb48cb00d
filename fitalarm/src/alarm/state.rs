use serde::Serialize;

use super::config::AlarmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString)]
pub enum AlarmState {
    Idle,
    Armed,
    Triggered,
    Stopping,
}

/// What put the alarm into `Triggered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum TriggerCause {
    /// Smoothed heart rate reached the threshold on this endpoint.
    Sensor,
    /// The scheduled time of day arrived on this endpoint.
    Schedule,
    /// The peer reported that its alarm fired.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StopReason {
    /// Heart rate fell back below the threshold after a sensor trigger.
    ThresholdRecovered,
    /// Heart rate reached the threshold while a scheduled or remote alarm
    /// was ringing.
    ThresholdReached,
    /// The peer reported that its alarm stopped.
    Remote,
    /// The user stopped the alarm on this endpoint.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum TransitionOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    Arm(AlarmConfig),
    Trigger(TriggerCause),
    Stop(StopReason),
    FeedbackStopped,
    Disarm,
}

impl AlarmEvent {
    pub fn origin(&self) -> TransitionOrigin {
        match self {
            AlarmEvent::Trigger(TriggerCause::Remote) | AlarmEvent::Stop(StopReason::Remote) => {
                TransitionOrigin::Remote
            }
            _ => TransitionOrigin::Local,
        }
    }
}

impl AlarmState {
    /// The state `event` moves this state to, or `None` if the event does
    /// not apply here.
    ///
    /// | From | Event | To |
    /// |------|-------|----|
    /// | Idle | Arm | Armed |
    /// | Armed | Trigger | Triggered |
    /// | Triggered | Stop | Stopping |
    /// | Stopping | FeedbackStopped | Idle |
    /// | Armed, Triggered | Disarm | Idle |
    ///
    /// Everything else, including a repeated trigger or stop, is `None`.
    pub fn next(self, event: &AlarmEvent) -> Option<AlarmState> {
        match (self, event) {
            (AlarmState::Idle, AlarmEvent::Arm(_)) => Some(AlarmState::Armed),
            (AlarmState::Armed, AlarmEvent::Trigger(_)) => Some(AlarmState::Triggered),
            (AlarmState::Triggered, AlarmEvent::Stop(_)) => Some(AlarmState::Stopping),
            (AlarmState::Stopping, AlarmEvent::FeedbackStopped) => Some(AlarmState::Idle),
            (AlarmState::Armed | AlarmState::Triggered, AlarmEvent::Disarm) => {
                Some(AlarmState::Idle)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn arm() -> AlarmEvent {
        AlarmEvent::Arm(AlarmConfig::new(110))
    }

    #[test_case(AlarmState::Idle, arm(), Some(AlarmState::Armed) ; "idle arms")]
    #[test_case(AlarmState::Armed, AlarmEvent::Trigger(TriggerCause::Sensor), Some(AlarmState::Triggered) ; "armed triggers")]
    #[test_case(AlarmState::Armed, AlarmEvent::Trigger(TriggerCause::Remote), Some(AlarmState::Triggered) ; "armed triggers remotely")]
    #[test_case(AlarmState::Triggered, AlarmEvent::Stop(StopReason::Manual), Some(AlarmState::Stopping) ; "triggered stops")]
    #[test_case(AlarmState::Stopping, AlarmEvent::FeedbackStopped, Some(AlarmState::Idle) ; "stopping settles")]
    #[test_case(AlarmState::Armed, AlarmEvent::Disarm, Some(AlarmState::Idle) ; "armed disarms")]
    #[test_case(AlarmState::Triggered, AlarmEvent::Disarm, Some(AlarmState::Idle) ; "triggered disarms")]
    fn should_follow_transition_table(
        from: AlarmState,
        event: AlarmEvent,
        expected: Option<AlarmState>,
    ) {
        assert_eq!(from.next(&event), expected);
    }

    #[test_case(AlarmState::Triggered, AlarmEvent::Trigger(TriggerCause::Sensor) ; "trigger while triggered")]
    #[test_case(AlarmState::Idle, AlarmEvent::Trigger(TriggerCause::Remote) ; "trigger while idle")]
    #[test_case(AlarmState::Stopping, AlarmEvent::Stop(StopReason::Remote) ; "stop while stopping")]
    #[test_case(AlarmState::Idle, AlarmEvent::Stop(StopReason::Manual) ; "stop while idle")]
    #[test_case(AlarmState::Armed, AlarmEvent::Stop(StopReason::ThresholdRecovered) ; "stop while armed")]
    #[test_case(AlarmState::Idle, AlarmEvent::Disarm ; "disarm while idle")]
    #[test_case(AlarmState::Stopping, AlarmEvent::Disarm ; "disarm while stopping")]
    #[test_case(AlarmState::Idle, AlarmEvent::FeedbackStopped ; "feedback stopped while idle")]
    #[test_case(AlarmState::Triggered, arm() ; "arm while triggered")]
    fn should_ignore_inapplicable_events(from: AlarmState, event: AlarmEvent) {
        assert_eq!(from.next(&event), None);
    }

    #[test]
    fn should_attribute_origin_to_remote_events_only() {
        assert_eq!(
            AlarmEvent::Trigger(TriggerCause::Remote).origin(),
            TransitionOrigin::Remote
        );
        assert_eq!(
            AlarmEvent::Stop(StopReason::Remote).origin(),
            TransitionOrigin::Remote
        );
        assert_eq!(
            AlarmEvent::Trigger(TriggerCause::Schedule).origin(),
            TransitionOrigin::Local
        );
        assert_eq!(
            AlarmEvent::Stop(StopReason::ThresholdRecovered).origin(),
            TransitionOrigin::Local
        );
        assert_eq!(AlarmEvent::Disarm.origin(), TransitionOrigin::Local);
    }
}
