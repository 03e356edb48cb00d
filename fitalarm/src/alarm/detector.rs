//! Trigger and stop condition detection.
//!
//! The detector is evaluated after every smoothed reading and on every
//! 1 Hz tick. It never changes alarm state itself; it reports events for
//! the state machine, and remembers just enough to report each condition
//! once:
//!
//! - the sensor trigger fires at most once per arm cycle, even while the
//!   average stays above the threshold;
//! - the scheduled trigger fires once per matching minute, however many
//!   ticks land inside it;
//! - the sensor stop condition fires once per ringing episode.

use time::{Date, OffsetDateTime, Time};

use super::config::AlarmConfig;
use super::machine::AlarmSnapshot;
use super::state::{AlarmEvent, AlarmState, StopReason, TriggerCause};
use crate::sensor::SmoothedReading;

#[derive(Debug, Default)]
pub struct ThresholdDetector {
    sensor_fired: bool,
    stop_reported: bool,
    tracked_schedule: Option<Time>,
    /// Minute the scheduled trigger last fired in.
    fired_minute: Option<(Date, u8, u8)>,
}

impl ThresholdDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the per-cycle suppression. Called whenever the alarm is
    /// (re-)armed.
    pub fn rearm(&mut self) {
        self.sensor_fired = false;
        self.stop_reported = false;
    }

    pub fn evaluate(
        &mut self,
        reading: Option<&SmoothedReading>,
        config: &AlarmConfig,
        now: OffsetDateTime,
        alarm: AlarmSnapshot,
    ) -> Vec<AlarmEvent> {
        if config.scheduled_time != self.tracked_schedule {
            self.tracked_schedule = config.scheduled_time;
            self.fired_minute = None;
        }

        let threshold = f64::from(config.bpm_threshold);
        let mut events = Vec::new();

        match alarm.state {
            AlarmState::Armed => {
                let at_threshold = reading.is_some_and(|r| r.average >= threshold);
                if at_threshold && !self.sensor_fired {
                    self.sensor_fired = true;
                    events.push(AlarmEvent::Trigger(TriggerCause::Sensor));
                }

                if let Some(scheduled) = config.scheduled_time {
                    let minute = (now.date(), now.hour(), now.minute());
                    let matches = now.hour() == scheduled.hour()
                        && now.minute() == scheduled.minute();
                    if matches && self.fired_minute != Some(minute) {
                        self.fired_minute = Some(minute);
                        events.push(AlarmEvent::Trigger(TriggerCause::Schedule));
                    }
                }
            }

            AlarmState::Triggered if !self.stop_reported => {
                let stop = match (reading, alarm.cause) {
                    (Some(reading), Some(TriggerCause::Sensor)) if reading.average < threshold => {
                        Some(StopReason::ThresholdRecovered)
                    }
                    (Some(reading), Some(TriggerCause::Schedule | TriggerCause::Remote))
                        if reading.average >= threshold =>
                    {
                        Some(StopReason::ThresholdReached)
                    }
                    _ => None,
                };

                if let Some(reason) = stop {
                    self.stop_reported = true;
                    events.push(AlarmEvent::Stop(reason));
                }
            }

            _ => {}
        }

        events
    }
}
