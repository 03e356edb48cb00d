//! The per-endpoint event loop.
//!
//! An [`Endpoint`] owns the smoother, detector, watchdog, state machine and
//! peer coordinator for one side of the link. Samples, 1 Hz ticks, transport
//! events and control commands all arrive through [`Endpoint::run`] and are
//! handled one at a time, so every alarm transition is atomic with respect
//! to everything else the endpoint sees.
//!
//! The step methods (`on_sample`, `on_tick`, ...) are public so callers that
//! drive time themselves, like the replay tool, can step an endpoint without
//! the loop.

use std::time::Duration;

use anyhow::anyhow;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alarm::{
    AlarmConfig, AlarmEvent, AlarmState, AlarmStateMachine, Outcome, StopReason,
    ThresholdDetector, TriggerCause,
};
use crate::api::commands::{EndpointCommand, Reply};
use crate::coordinator::PeerCoordinator;
use crate::error::{Error, Result};
use crate::feedback::FeedbackDevice;
use crate::protocol::Command;
use crate::sensor::{
    DEFAULT_WINDOW_SIZE, Sample, SampleSmoother, SensorStatus, SensorWatchdog, SmoothedReading,
    WatchdogEdge,
};
use crate::tracing::prelude::*;
use crate::transport::{MessageChannel, SendOutcome, Session, TransportEvent};

/// Detector evaluation and watchdog check period.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_SENSOR_TIMEOUT: Duration = Duration::from_secs(30);

const SAMPLE_QUEUE_DEPTH: usize = 256;
const COMMAND_QUEUE_DEPTH: usize = 16;

/// A point in time as seen by the endpoint: monotonic for sensor liveness,
/// wall clock for the scheduled trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub instant: Instant,
    pub wall: OffsetDateTime,
}

impl Moment {
    pub fn now(offset: UtcOffset) -> Self {
        Self {
            instant: Instant::now(),
            wall: OffsetDateTime::now_utc().to_offset(offset),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Shown in logs and status.
    pub name: String,
    pub window_size: usize,
    pub sensor_timeout: Duration,
    /// Offset used to read the wall clock for scheduled alarms.
    pub utc_offset: UtcOffset,
    /// Push the threshold to the peer whenever this endpoint is armed.
    pub share_threshold: bool,
}

impl EndpointSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window_size: DEFAULT_WINDOW_SIZE,
            sensor_timeout: DEFAULT_SENSOR_TIMEOUT,
            utc_offset: UtcOffset::UTC,
            share_threshold: false,
        }
    }
}

/// Snapshot published after every handled input.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointStatus {
    pub name: String,
    pub state: AlarmState,
    pub cause: Option<TriggerCause>,
    pub config: Option<AlarmConfig>,
    pub reading: Option<SmoothedReading>,
    pub sensor: SensorStatus,
    pub session: Session,
    pub last_send: Option<SendOutcome>,
}

/// Cloneable access to a running endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    samples: mpsc::Sender<Sample>,
    commands: mpsc::Sender<EndpointCommand>,
    status: watch::Receiver<EndpointStatus>,
}

impl EndpointHandle {
    pub fn status(&self) -> EndpointStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EndpointStatus> {
        self.status.clone()
    }

    /// Queue a sensor sample stamped now.
    pub async fn push_sample(&self, value: f64) -> Result<()> {
        self.samples
            .send(Sample::now(value))
            .await
            .map_err(|_| Error::EndpointClosed)
    }

    pub async fn arm(&self, config: AlarmConfig) -> anyhow::Result<AlarmState> {
        self.request(|reply| EndpointCommand::Arm { config, reply })
            .await
    }

    pub async fn disarm(&self) -> anyhow::Result<AlarmState> {
        self.request(|reply| EndpointCommand::Disarm { reply }).await
    }

    pub async fn stop(&self) -> anyhow::Result<AlarmState> {
        self.request(|reply| EndpointCommand::Stop { reply }).await
    }

    /// Send a command and wait for the endpoint to apply it.
    pub async fn request(
        &self,
        command: impl FnOnce(Reply) -> EndpointCommand,
    ) -> anyhow::Result<AlarmState> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::EndpointClosed)?;
        rx.await.map_err(|_| Error::EndpointClosed)?
    }
}

pub struct Endpoint {
    name: String,
    share_threshold: bool,
    utc_offset: UtcOffset,
    smoother: SampleSmoother,
    detector: ThresholdDetector,
    watchdog: SensorWatchdog,
    machine: AlarmStateMachine,
    coordinator: PeerCoordinator,
    samples_rx: mpsc::Receiver<Sample>,
    commands_rx: mpsc::Receiver<EndpointCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    status_tx: watch::Sender<EndpointStatus>,
}

impl Endpoint {
    pub fn new(
        settings: EndpointSettings,
        mut channel: Box<dyn MessageChannel>,
        feedback: Box<dyn FeedbackDevice>,
    ) -> Result<(Self, EndpointHandle)> {
        let transport_rx = channel
            .take_event_receiver()
            .ok_or_else(|| Error::Other("transport event receiver already taken".into()))?;

        let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_QUEUE_DEPTH);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let machine = AlarmStateMachine::new(feedback);
        let coordinator = PeerCoordinator::new(channel);
        let watchdog = SensorWatchdog::new(settings.sensor_timeout);
        let (status_tx, status_rx) = watch::channel(EndpointStatus {
            name: settings.name.clone(),
            state: machine.state(),
            cause: None,
            config: None,
            reading: None,
            sensor: watchdog.status(),
            session: coordinator.session(),
            last_send: None,
        });

        let endpoint = Self {
            name: settings.name,
            share_threshold: settings.share_threshold,
            utc_offset: settings.utc_offset,
            smoother: SampleSmoother::new(settings.window_size),
            detector: ThresholdDetector::new(),
            watchdog,
            machine,
            coordinator,
            samples_rx,
            commands_rx,
            transport_rx,
            status_tx,
        };
        let handle = EndpointHandle {
            samples: samples_tx,
            commands: commands_tx,
            status: status_rx,
        };

        Ok((endpoint, handle))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AlarmState {
        self.machine.state()
    }

    pub fn status(&self) -> EndpointStatus {
        EndpointStatus {
            name: self.name.clone(),
            state: self.machine.state(),
            cause: self.machine.cause(),
            config: self.machine.config().cloned(),
            reading: self.smoother.current(),
            sensor: self.watchdog.status(),
            session: self.coordinator.session(),
            last_send: self.coordinator.last_outcome().cloned(),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(endpoint = %self.name, "Endpoint started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = interval.tick() => {
                    self.on_tick(Moment::now(self.utc_offset)).await;
                }

                Some(sample) = self.samples_rx.recv() => {
                    self.on_sample(sample, Moment::now(self.utc_offset)).await;
                }

                Some(command) = self.commands_rx.recv() => {
                    self.on_command(command).await;
                }

                Some(event) = self.transport_rx.recv() => {
                    self.on_transport_event(event).await;
                }
            }
        }

        self.apply(AlarmEvent::Disarm).await;
        self.publish_status();
        info!(endpoint = %self.name, "Endpoint stopped");
    }

    pub async fn on_sample(&mut self, sample: Sample, moment: Moment) {
        if self.watchdog.sample(sample.timestamp) == WatchdogEdge::BecameAvailable {
            info!(endpoint = %self.name, "Heart rate sensor available");
        }

        let Some(reading) = self.smoother.ingest(sample) else {
            return;
        };
        trace!(
            endpoint = %self.name,
            value = sample.value,
            average = reading.average,
            samples = reading.sample_count,
            "Sample ingested"
        );

        self.evaluate(Some(reading), moment).await;
        self.publish_status();
    }

    pub async fn on_tick(&mut self, moment: Moment) {
        if self.watchdog.check(moment.instant) == WatchdogEdge::BecameUnavailable {
            warn!(endpoint = %self.name, "Heart rate sensor went quiet, sensor trigger paused");
            self.smoother.reset();
        }

        self.evaluate(self.smoother.current(), moment).await;
        self.publish_status();
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        let reconnected = event == TransportEvent::ReachabilityChanged(true);
        if let Some(inbound) = self.coordinator.handle_transport_event(event) {
            if let Some(bpm) = inbound.threshold {
                self.machine.set_threshold(bpm);
            }
            if let Some(event) = inbound.event {
                self.apply(event).await;
            }
        }
        // A threshold shared while the peer was away never arrived.
        if reconnected {
            self.share_threshold_with_peer();
        }
        self.publish_status();
    }

    pub async fn on_command(&mut self, command: EndpointCommand) {
        let (reply, result) = match command {
            EndpointCommand::Arm { config, reply } => (reply, self.arm(config).await),
            EndpointCommand::Disarm { reply } => {
                self.apply(AlarmEvent::Disarm).await;
                (reply, Ok(self.state()))
            }
            EndpointCommand::Stop { reply } => {
                let result = match self.state() {
                    AlarmState::Triggered => {
                        self.apply(AlarmEvent::Stop(StopReason::Manual)).await;
                        Ok(self.state())
                    }
                    state => Err(anyhow!("alarm is not ringing (state {state})")),
                };
                (reply, result)
            }
        };

        // Status first, so a caller woken by the reply reads fresh state.
        self.publish_status();
        if reply.send(result).is_err() {
            debug!(endpoint = %self.name, "Command reply receiver dropped");
        }
    }

    /// Handle every transport event already queued. Returns how many were
    /// handled.
    pub async fn drain_transport(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.transport_rx.try_recv() {
            self.on_transport_event(event).await;
            handled += 1;
        }
        handled
    }

    async fn arm(&mut self, config: AlarmConfig) -> anyhow::Result<AlarmState> {
        let state = self.state();
        if matches!(state, AlarmState::Triggered | AlarmState::Stopping) {
            return Err(anyhow!("cannot arm while alarm is {state}"));
        }

        self.apply(AlarmEvent::Arm(config)).await;
        self.share_threshold_with_peer();
        Ok(self.state())
    }

    /// Push the configured threshold to the peer, if this endpoint shares it.
    fn share_threshold_with_peer(&mut self) {
        if !self.share_threshold {
            return;
        }
        if let Some(bpm_threshold) = self.machine.config().map(|c| c.bpm_threshold) {
            self.coordinator.publish(Command::configure(bpm_threshold));
        }
    }

    async fn evaluate(&mut self, reading: Option<SmoothedReading>, moment: Moment) {
        let Some(config) = self.machine.config().cloned() else {
            return;
        };
        let events = self.detector.evaluate(
            reading.as_ref(),
            &config,
            moment.wall,
            self.machine.snapshot(),
        );
        for event in events {
            self.apply(event).await;
        }
    }

    /// Feed an event to the machine along with any follow-up it asks for.
    async fn apply(&mut self, event: AlarmEvent) {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            match self.machine.handle(event).await {
                Outcome::Ignored => {}
                Outcome::Reconfigured => self.detector.rearm(),
                Outcome::Transitioned(transition) => {
                    if transition.to == AlarmState::Armed {
                        self.detector.rearm();
                    }
                    if let Some(command) = transition.outbound {
                        self.coordinator.publish(command);
                    }
                    next = transition.follow_up;
                }
            }
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }
}
