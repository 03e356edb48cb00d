//! Message channel between the wearable and its companion.
//!
//! A [`MessageChannel`] owns the link to the peer. It reports session
//! changes and inbound commands as [`TransportEvent`]s on a receiver the
//! endpoint takes once, and accepts outbound commands without blocking.
//! Delivery is best effort: there are no retries, no ordering guarantees
//! and no acknowledgements at this layer.

pub mod loopback;
pub mod tcp;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::Command;

/// Capacity of the event queue from a transport to its endpoint.
pub const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
pub enum ActivationState {
    #[default]
    NotActivated,
    Activating,
    Activated,
    Failed,
}

/// Link status as last reported by the transport.
///
/// Only the transport writes it; everyone else observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Session {
    pub reachable: bool,
    pub activation_state: ActivationState,
}

impl Session {
    pub fn is_usable(&self) -> bool {
        self.reachable && self.activation_state == ActivationState::Activated
    }
}

/// Result of a single send attempt. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SendOutcome {
    /// Handed to the link. Not a confirmation the peer acted on it.
    Delivered,
    /// The peer is not reachable; the command was not sent.
    Unreachable,
    Failed(String),
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendOutcome::Delivered => f.write_str("delivered"),
            SendOutcome::Unreachable => f.write_str("unreachable"),
            SendOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ActivationComplete(ActivationState),
    ReachabilityChanged(bool),
    MessageReceived(Command),
}

pub trait MessageChannel: Send {
    /// Current session, as of the last transport update.
    fn session(&self) -> Session;

    /// Attempt to send `command` to the peer.
    ///
    /// Checks reachability first, then activation. Returns immediately in
    /// every case.
    fn send(&self, command: &Command) -> SendOutcome;

    /// Take the event receiver. Returns `None` after the first call.
    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;
}

/// Gate a send on the session the way every transport must.
pub(crate) fn check_session(session: Session) -> Result<(), SendOutcome> {
    if !session.reachable {
        return Err(SendOutcome::Unreachable);
    }
    if session.activation_state != ActivationState::Activated {
        return Err(SendOutcome::Failed("session not activated".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(false, ActivationState::Activated, Err(SendOutcome::Unreachable) ; "unreachable wins")]
    #[test_case(false, ActivationState::NotActivated, Err(SendOutcome::Unreachable) ; "unreachable and inactive")]
    #[test_case(true, ActivationState::Activating, Err(SendOutcome::Failed("session not activated".into())) ; "activating")]
    #[test_case(true, ActivationState::Failed, Err(SendOutcome::Failed("session not activated".into())) ; "activation failed")]
    #[test_case(true, ActivationState::Activated, Ok(()) ; "usable")]
    fn should_gate_sends_on_session(
        reachable: bool,
        activation_state: ActivationState,
        expected: Result<(), SendOutcome>,
    ) {
        let session = Session {
            reachable,
            activation_state,
        };

        assert_eq!(check_session(session), expected);
        assert_eq!(session.is_usable(), expected.is_ok());
    }

    #[test]
    fn send_outcome_should_render_reason() {
        assert_eq!(
            SendOutcome::Failed("link reset".into()).to_string(),
            "failed: link reset"
        );
        assert_eq!(SendOutcome::Unreachable.to_string(), "unreachable");
    }
}
