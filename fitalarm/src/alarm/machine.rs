use super::config::AlarmConfig;
use super::state::{AlarmEvent, AlarmState, TransitionOrigin, TriggerCause};
use crate::feedback::FeedbackDevice;
use crate::protocol::Command;
use crate::tracing::prelude::*;

/// The parts of the machine the detector needs to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmSnapshot {
    pub state: AlarmState,
    pub cause: Option<TriggerCause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: AlarmState,
    pub to: AlarmState,
    pub origin: TransitionOrigin,

    /// Command for the peer. Only local triggers and local stops produce
    /// one; transitions caused by the peer are never echoed back.
    pub outbound: Option<Command>,

    /// Event the caller must feed back in before handling anything else.
    pub follow_up: Option<AlarmEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The event does not apply in the current state.
    Ignored,

    /// `Arm` while already armed: new configuration, same state.
    Reconfigured,

    Transitioned(Transition),
}

/// Owner of the endpoint's alarm state.
///
/// Events are handled one at a time; the endpoint's event loop is the only
/// caller, which is what makes each transition atomic with respect to
/// samples, ticks and inbound messages.
pub struct AlarmStateMachine {
    state: AlarmState,
    cause: Option<TriggerCause>,
    config: Option<AlarmConfig>,
    feedback: Box<dyn FeedbackDevice>,
}

impl AlarmStateMachine {
    pub fn new(feedback: Box<dyn FeedbackDevice>) -> Self {
        Self {
            state: AlarmState::Idle,
            cause: None,
            config: None,
            feedback,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn cause(&self) -> Option<TriggerCause> {
        self.cause
    }

    pub fn config(&self) -> Option<&AlarmConfig> {
        self.config.as_ref()
    }

    pub fn snapshot(&self) -> AlarmSnapshot {
        AlarmSnapshot {
            state: self.state,
            cause: self.cause,
        }
    }

    /// Replace the threshold, keeping any scheduled time.
    ///
    /// Applies to the next evaluation without changing state. With no
    /// configuration yet, stores one so a later arm can reuse it.
    pub fn set_threshold(&mut self, bpm_threshold: u32) {
        match &mut self.config {
            Some(config) => config.bpm_threshold = bpm_threshold,
            None => self.config = Some(AlarmConfig::new(bpm_threshold)),
        }
        info!(bpm_threshold, state = %self.state, "Alarm threshold updated");
    }

    pub async fn handle(&mut self, event: AlarmEvent) -> Outcome {
        let origin = event.origin();

        let Some(next) = self.state.next(&event) else {
            if let (AlarmState::Armed, AlarmEvent::Arm(config)) = (self.state, &event) {
                info!(
                    bpm_threshold = config.bpm_threshold,
                    scheduled = ?config.scheduled_time,
                    "Alarm re-armed with new configuration"
                );
                self.config = Some(config.clone());
                return Outcome::Reconfigured;
            }

            debug!(state = %self.state, event = ?event, "Event ignored in current state");
            return Outcome::Ignored;
        };

        let from = self.state;
        let mut outbound = None;
        let mut follow_up = None;

        match event {
            AlarmEvent::Arm(config) => {
                self.config = Some(config);
                self.cause = None;
            }

            AlarmEvent::Trigger(cause) => {
                self.cause = Some(cause);
                if let Err(e) = self.feedback.start_continuous_feedback().await {
                    warn!(error = %e, "Failed to start alarm feedback");
                }
                if origin == TransitionOrigin::Local {
                    outbound = Some(Command::alarm_fired());
                }
            }

            AlarmEvent::Stop(reason) => {
                self.stop_feedback().await;
                if origin == TransitionOrigin::Local {
                    outbound = Some(Command::stop_alarm());
                }
                follow_up = Some(AlarmEvent::FeedbackStopped);
                debug!(reason = %reason, "Stopping alarm");
            }

            AlarmEvent::FeedbackStopped => {
                self.cause = None;
            }

            AlarmEvent::Disarm => {
                if from == AlarmState::Triggered {
                    self.stop_feedback().await;
                }
                self.cause = None;
            }
        }

        self.state = next;

        info!(
            from = %from,
            to = %next,
            origin = %origin,
            cause = ?self.cause,
            "Alarm state changed"
        );

        Outcome::Transitioned(Transition {
            from,
            to: next,
            origin,
            outbound,
            follow_up,
        })
    }

    async fn stop_feedback(&mut self) {
        if let Err(e) = self.feedback.stop_feedback().await {
            warn!(error = %e, "Failed to stop alarm feedback");
        }
    }
}

impl std::fmt::Debug for AlarmStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmStateMachine")
            .field("state", &self.state)
            .field("cause", &self.cause)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
