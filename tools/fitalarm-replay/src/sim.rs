//! Deterministic stepping of a wearable/companion pair.
//!
//! Both endpoints share a loopback link. Time is simulated: every capture
//! row is one sample for the wearable, and both endpoints tick once per
//! simulated second. After each step the link is drained until neither
//! side has anything queued, so the timeline never depends on scheduling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use time::{OffsetDateTime, Time};
use tokio::sync::oneshot;
use tokio::time::Instant;

use fitalarm::alarm::{AlarmConfig, AlarmState, TriggerCause};
use fitalarm::api::commands::EndpointCommand;
use fitalarm::endpoint::{Endpoint, EndpointSettings, Moment};
use fitalarm::feedback::{FeedbackDevice, FeedbackError};
use fitalarm::sensor::Sample;
use fitalarm::transport::SendOutcome;
use fitalarm::transport::loopback::{self, LinkControl};

use crate::capture::CaptureRow;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub threshold: u32,
    pub window: usize,
    pub scheduled: Option<Time>,
    /// Wall clock time of the first row.
    pub start: Time,
    /// Simulated second at which the peer becomes unreachable.
    pub drop_link_at: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    Transition {
        endpoint: &'static str,
        from: AlarmState,
        to: AlarmState,
        cause: Option<TriggerCause>,
        average: Option<f64>,
        last_send: Option<SendOutcome>,
    },
    Feedback {
        endpoint: &'static str,
        active: bool,
    },
    LinkDropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub seconds: f64,
    pub wall: OffsetDateTime,
    pub event: TimelineEvent,
}

type FeedbackLog = Arc<Mutex<Vec<(&'static str, bool)>>>;

/// Feedback device that notes calls for the timeline.
struct TimelineFeedback {
    endpoint: &'static str,
    log: FeedbackLog,
}

#[async_trait]
impl FeedbackDevice for TimelineFeedback {
    async fn start_continuous_feedback(&mut self) -> Result<(), FeedbackError> {
        self.log.lock().push((self.endpoint, true));
        Ok(())
    }

    async fn stop_feedback(&mut self) -> Result<(), FeedbackError> {
        self.log.lock().push((self.endpoint, false));
        Ok(())
    }
}

struct Side {
    label: &'static str,
    endpoint: Endpoint,
    last_state: AlarmState,
}

struct Simulation {
    sides: [Side; 2],
    link: LinkControl,
    feedback: FeedbackLog,
    base_instant: Instant,
    base_wall: OffsetDateTime,
    drop_link_at: Option<f64>,
    link_dropped: bool,
    timeline: Vec<TimelineEntry>,
}

const WEARABLE: usize = 0;
const COMPANION: usize = 1;

pub async fn replay(rows: &[CaptureRow], options: &ReplayOptions) -> Result<Vec<TimelineEntry>> {
    let mut sim = Simulation::new(options)?;
    sim.pump().await;

    let mut config = AlarmConfig::new(options.threshold);
    if let Some(at) = options.scheduled {
        config = config.with_scheduled_time(at);
    }
    sim.arm(COMPANION, config.clone()).await?;
    sim.arm(WEARABLE, config).await?;
    sim.record(0.0);

    let mut next_tick = 1.0;
    for row in rows {
        while next_tick <= row.seconds {
            sim.tick(next_tick).await;
            next_tick += 1.0;
        }
        sim.sample(row).await;
    }

    Ok(sim.timeline)
}

impl Simulation {
    fn new(options: &ReplayOptions) -> Result<Self> {
        let (a, b, link) = loopback::pair();
        let feedback = FeedbackLog::default();

        let mut wearable_settings = EndpointSettings::new("wearable");
        wearable_settings.window_size = options.window;
        let mut companion_settings = EndpointSettings::new("companion");
        companion_settings.window_size = options.window;
        companion_settings.share_threshold = true;

        let (wearable, _) = Endpoint::new(
            wearable_settings,
            Box::new(a),
            Box::new(TimelineFeedback {
                endpoint: "wearable",
                log: feedback.clone(),
            }),
        )?;
        let (companion, _) = Endpoint::new(
            companion_settings,
            Box::new(b),
            Box::new(TimelineFeedback {
                endpoint: "companion",
                log: feedback.clone(),
            }),
        )?;

        link.activate();

        Ok(Self {
            sides: [
                Side {
                    label: "wearable",
                    endpoint: wearable,
                    last_state: AlarmState::Idle,
                },
                Side {
                    label: "companion",
                    endpoint: companion,
                    last_state: AlarmState::Idle,
                },
            ],
            link,
            feedback,
            base_instant: Instant::now(),
            base_wall: OffsetDateTime::now_utc().replace_time(options.start),
            drop_link_at: options.drop_link_at,
            link_dropped: false,
            timeline: Vec::new(),
        })
    }

    fn moment(&self, seconds: f64) -> Moment {
        Moment {
            instant: self.base_instant + Duration::from_secs_f64(seconds),
            wall: self.base_wall + time::Duration::seconds_f64(seconds),
        }
    }

    async fn arm(&mut self, side: usize, config: AlarmConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.sides[side]
            .endpoint
            .on_command(EndpointCommand::Arm { config, reply })
            .await;
        rx.await
            .context("endpoint dropped the reply")?
            .with_context(|| format!("failed to arm {}", self.sides[side].label))?;
        self.pump().await;
        Ok(())
    }

    async fn tick(&mut self, seconds: f64) {
        self.before_step(seconds);
        let moment = self.moment(seconds);
        for side in &mut self.sides {
            side.endpoint.on_tick(moment).await;
        }
        self.pump().await;
        self.record(seconds);
    }

    async fn sample(&mut self, row: &CaptureRow) {
        self.before_step(row.seconds);
        let moment = self.moment(row.seconds);
        let sample = Sample {
            value: row.bpm,
            timestamp: moment.instant,
        };
        self.sides[WEARABLE].endpoint.on_sample(sample, moment).await;
        self.pump().await;
        self.record(row.seconds);
    }

    fn before_step(&mut self, seconds: f64) {
        let due = self
            .drop_link_at
            .is_some_and(|at| !self.link_dropped && seconds >= at);
        if due {
            self.link_dropped = true;
            self.link.set_reachable(false);
            self.push(seconds, TimelineEvent::LinkDropped);
        }
    }

    /// Deliver queued link traffic until both sides are quiet.
    async fn pump(&mut self) {
        loop {
            let mut handled = 0;
            for side in &mut self.sides {
                handled += side.endpoint.drain_transport().await;
            }
            if handled == 0 {
                break;
            }
        }
    }

    fn record(&mut self, seconds: f64) {
        let calls: Vec<_> = self.feedback.lock().drain(..).collect();

        for index in 0..self.sides.len() {
            let status = self.sides[index].endpoint.status();
            let from = self.sides[index].last_state;
            if status.state == from {
                continue;
            }
            self.sides[index].last_state = status.state;
            let event = TimelineEvent::Transition {
                endpoint: self.sides[index].label,
                from,
                to: status.state,
                cause: status.cause,
                average: status.reading.map(|r| r.average),
                last_send: status.last_send,
            };
            self.push(seconds, event);
        }

        for (endpoint, active) in calls {
            self.push(seconds, TimelineEvent::Feedback { endpoint, active });
        }
    }

    fn push(&mut self, seconds: f64, event: TimelineEvent) {
        let wall = self.moment(seconds).wall;
        self.timeline.push(TimelineEntry {
            seconds,
            wall,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use time::macros::time;

    use super::*;

    fn rows(values: &[(f64, f64)]) -> Vec<CaptureRow> {
        values
            .iter()
            .map(|&(seconds, bpm)| CaptureRow { seconds, bpm })
            .collect()
    }

    fn options(threshold: u32, window: usize) -> ReplayOptions {
        ReplayOptions {
            threshold,
            window,
            scheduled: None,
            start: time!(06:00),
            drop_link_at: None,
        }
    }

    fn transitions(timeline: &[TimelineEntry]) -> Vec<(&'static str, AlarmState, AlarmState)> {
        timeline
            .iter()
            .filter_map(|entry| match &entry.event {
                TimelineEvent::Transition {
                    endpoint, from, to, ..
                } => Some((*endpoint, *from, *to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn should_mirror_sensor_alarm_on_companion() {
        let capture = rows(&[(0.0, 95.0), (1.0, 102.0), (2.0, 111.0), (3.0, 90.0)]);

        let timeline = replay(&capture, &options(110, 1)).await.unwrap();

        assert_eq!(
            transitions(&timeline),
            vec![
                ("wearable", AlarmState::Idle, AlarmState::Armed),
                ("companion", AlarmState::Idle, AlarmState::Armed),
                ("wearable", AlarmState::Armed, AlarmState::Triggered),
                ("companion", AlarmState::Armed, AlarmState::Triggered),
                ("wearable", AlarmState::Triggered, AlarmState::Idle),
                ("companion", AlarmState::Triggered, AlarmState::Idle),
            ]
        );

        let fired = timeline
            .iter()
            .find(|e| {
                matches!(
                    e.event,
                    TimelineEvent::Transition {
                        to: AlarmState::Triggered,
                        ..
                    }
                )
            })
            .unwrap();
        assert_eq!(fired.seconds, 2.0);
    }

    #[tokio::test]
    async fn should_leave_companion_ringing_after_link_drop() {
        let capture = rows(&[(0.0, 120.0), (5.0, 80.0)]);
        let mut options = options(110, 1);
        options.drop_link_at = Some(3.0);

        let timeline = replay(&capture, &options).await.unwrap();

        assert!(timeline.iter().any(|e| e.event == TimelineEvent::LinkDropped));
        let last = transitions(&timeline);
        assert_eq!(
            last.last(),
            Some(&("wearable", AlarmState::Triggered, AlarmState::Idle))
        );
        assert!(!last.contains(&("companion", AlarmState::Triggered, AlarmState::Idle)));
    }

    #[tokio::test]
    async fn should_fire_scheduled_alarm_on_both_sides() {
        let capture = rows(&[(0.0, 70.0), (125.0, 72.0)]);
        let mut options = options(150, 5);
        options.scheduled = Some(time!(06:02));

        let timeline = replay(&capture, &options).await.unwrap();

        let triggered: Vec<_> = timeline
            .iter()
            .filter_map(|e| match e.event {
                TimelineEvent::Transition {
                    endpoint,
                    to: AlarmState::Triggered,
                    cause,
                    ..
                } => Some((endpoint, cause, e.seconds)),
                _ => None,
            })
            .collect();
        assert_eq!(
            triggered,
            vec![
                ("wearable", Some(TriggerCause::Schedule), 120.0),
                ("companion", Some(TriggerCause::Schedule), 120.0),
            ]
        );
    }
}
