//! Bridge between the alarm state machine and the peer link.
//!
//! Outbound, the coordinator forwards commands produced by local transitions
//! and records how each send went. Inbound, it turns peer commands into
//! threshold updates and alarm events. It never retries, never queues and
//! never waits for the peer.

use tokio::sync::mpsc;

use crate::alarm::{AlarmEvent, StopReason, TriggerCause};
use crate::protocol::{Action, Command};
use crate::tracing::prelude::*;
use crate::transport::{ActivationState, MessageChannel, SendOutcome, Session, TransportEvent};

/// What an inbound command asks of the local machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inbound {
    /// Apply before `event`.
    pub threshold: Option<u32>,
    pub event: Option<AlarmEvent>,
}

impl Inbound {
    pub fn is_empty(&self) -> bool {
        self.threshold.is_none() && self.event.is_none()
    }
}

pub struct PeerCoordinator {
    channel: Box<dyn MessageChannel>,
    last_outcome: Option<SendOutcome>,
}

impl PeerCoordinator {
    pub fn new(channel: Box<dyn MessageChannel>) -> Self {
        Self {
            channel,
            last_outcome: None,
        }
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.channel.take_event_receiver()
    }

    pub fn session(&self) -> Session {
        self.channel.session()
    }

    /// Outcome of the most recent send, if any.
    pub fn last_outcome(&self) -> Option<&SendOutcome> {
        self.last_outcome.as_ref()
    }

    /// Send once and record the outcome. Failures are logged, not retried.
    pub fn publish(&mut self, command: Command) -> SendOutcome {
        let outcome = self.channel.send(&command);
        match &outcome {
            SendOutcome::Delivered => {
                debug!(action = %command.action, "Command sent to peer");
            }
            SendOutcome::Unreachable => {
                warn!(action = %command.action, "Peer unreachable, command not sent");
            }
            SendOutcome::Failed(reason) => {
                warn!(action = %command.action, reason, "Failed to send command to peer");
            }
        }
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    pub fn on_activation_complete(&mut self, state: ActivationState) {
        match state {
            ActivationState::Activated => info!("Peer session activated"),
            ActivationState::Failed => warn!("Peer session activation failed"),
            other => debug!(state = %other, "Peer session activation state"),
        }
    }

    pub fn on_reachability_changed(&mut self, reachable: bool) {
        info!(reachable, "Peer reachability changed");
    }

    /// Translate a peer command.
    ///
    /// A ping is answered with an ack straight away. The threshold field is
    /// honored on any command that carries it, without arming.
    pub fn on_message_received(&mut self, command: Command) -> Inbound {
        let threshold = command.bpm_threshold();
        let event = match command.action {
            Action::Ping => {
                self.publish(Command::ack());
                None
            }
            Action::AlarmFired => Some(AlarmEvent::Trigger(TriggerCause::Remote)),
            Action::StopAlarm => Some(AlarmEvent::Stop(StopReason::Remote)),
            Action::Ack => None,
        };

        debug!(action = %command.action, ?threshold, ?event, "Peer command received");
        Inbound { threshold, event }
    }

    /// Dispatch a transport event. Only messages produce work for the
    /// state machine.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Option<Inbound> {
        match event {
            TransportEvent::ActivationComplete(state) => {
                self.on_activation_complete(state);
                None
            }
            TransportEvent::ReachabilityChanged(reachable) => {
                self.on_reachability_changed(reachable);
                None
            }
            TransportEvent::MessageReceived(command) => {
                Some(self.on_message_received(command)).filter(|inbound| !inbound.is_empty())
            }
        }
    }
}
