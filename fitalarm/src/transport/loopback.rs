//! In-process link joining two endpoints.
//!
//! Both channels share one session. A [`LinkControl`] handle plays the role
//! of the platform: it activates the session, toggles reachability, makes
//! sends fail and injects raw frames. Commands still travel as wire text so
//! both ends exercise the same decoding as a real link.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    ActivationState, EVENT_QUEUE_DEPTH, MessageChannel, SendOutcome, Session, TransportEvent,
    check_session,
};
use crate::protocol::Command;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    fn peer(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

#[derive(Debug, Default)]
struct LinkState {
    session: Session,
    fail_next: [Option<String>; 2],
}

#[derive(Debug)]
struct Link {
    state: Mutex<LinkState>,
    events: [mpsc::Sender<TransportEvent>; 2],
}

impl Link {
    fn notify(&self, side: Side, event: TransportEvent) {
        if let Err(e) = self.events[side.index()].try_send(event) {
            warn!(side = %side, error = %e, "Loopback event dropped");
        }
    }

    fn notify_both(&self, event: TransportEvent) {
        self.notify(Side::A, event.clone());
        self.notify(Side::B, event);
    }

    fn deliver(&self, to: Side, frame: &str) -> bool {
        match Command::from_wire(frame) {
            Ok(command) => {
                trace!(side = %to, frame, "Loopback frame received");
                self.events[to.index()]
                    .try_send(TransportEvent::MessageReceived(command))
                    .is_ok()
            }
            Err(e) => {
                debug!(side = %to, error = %e, frame, "Dropping malformed frame");
                true
            }
        }
    }
}

/// One end of a loopback link.
#[derive(Debug)]
pub struct LoopbackChannel {
    side: Side,
    link: Arc<Link>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl LoopbackChannel {
    pub fn side(&self) -> Side {
        self.side
    }
}

impl MessageChannel for LoopbackChannel {
    fn session(&self) -> Session {
        self.link.state.lock().session
    }

    fn send(&self, command: &Command) -> SendOutcome {
        let mut state = self.link.state.lock();
        if let Err(outcome) = check_session(state.session) {
            return outcome;
        }
        if let Some(reason) = state.fail_next[self.side.index()].take() {
            return SendOutcome::Failed(reason);
        }
        drop(state);

        if self.link.deliver(self.side.peer(), &command.to_wire()) {
            SendOutcome::Delivered
        } else {
            SendOutcome::Failed("peer queue full".into())
        }
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }
}

/// Platform-side control over a loopback link.
#[derive(Debug, Clone)]
pub struct LinkControl {
    link: Arc<Link>,
}

impl LinkControl {
    /// Complete activation and mark the peer reachable on both sides.
    pub fn activate(&self) {
        self.set_activation(ActivationState::Activated);
        self.set_reachable(true);
    }

    pub fn set_activation(&self, activation_state: ActivationState) {
        let changed = {
            let mut state = self.link.state.lock();
            let changed = state.session.activation_state != activation_state;
            state.session.activation_state = activation_state;
            changed
        };
        if changed {
            self.link
                .notify_both(TransportEvent::ActivationComplete(activation_state));
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        let changed = {
            let mut state = self.link.state.lock();
            let changed = state.session.reachable != reachable;
            state.session.reachable = reachable;
            changed
        };
        if changed {
            self.link
                .notify_both(TransportEvent::ReachabilityChanged(reachable));
        }
    }

    /// Make the next send from `side` fail with `reason`.
    pub fn fail_next_send(&self, side: Side, reason: impl Into<String>) {
        self.link.state.lock().fail_next[side.index()] = Some(reason.into());
    }

    /// Deliver a raw frame to `side` as if the peer had sent it.
    pub fn inject(&self, side: Side, frame: &str) {
        if !self.link.deliver(side, frame) {
            warn!(side = %side, "Injected frame dropped, queue full");
        }
    }

    pub fn session(&self) -> Session {
        self.link.state.lock().session
    }
}

/// Create both ends of a link, initially not activated and unreachable.
pub fn pair() -> (LoopbackChannel, LoopbackChannel, LinkControl) {
    let (tx_a, rx_a) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let (tx_b, rx_b) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let link = Arc::new(Link {
        state: Mutex::new(LinkState::default()),
        events: [tx_a, tx_b],
    });

    let a = LoopbackChannel {
        side: Side::A,
        link: link.clone(),
        events: Some(rx_a),
    };
    let b = LoopbackChannel {
        side: Side::B,
        link: link.clone(),
        events: Some(rx_b),
    };
    (a, b, LinkControl { link })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;

    fn drain(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn should_refuse_sends_before_activation() {
        let (a, _b, control) = pair();

        assert_eq!(a.send(&Command::ping()), SendOutcome::Unreachable);

        control.set_reachable(true);
        assert_eq!(
            a.send(&Command::ping()),
            SendOutcome::Failed("session not activated".into())
        );
    }

    #[test]
    fn should_report_session_changes_to_both_sides() {
        let (mut a, mut b, control) = pair();
        let mut rx_a = a.take_event_receiver().unwrap();
        let mut rx_b = b.take_event_receiver().unwrap();

        control.activate();
        control.activate();

        let expected = vec![
            TransportEvent::ActivationComplete(ActivationState::Activated),
            TransportEvent::ReachabilityChanged(true),
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
        assert!(a.session().is_usable());
        assert!(b.session().is_usable());
    }

    #[test]
    fn should_deliver_commands_to_peer_only() {
        let (mut a, mut b, control) = pair();
        let mut rx_a = a.take_event_receiver().unwrap();
        let mut rx_b = b.take_event_receiver().unwrap();
        control.activate();
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_eq!(a.send(&Command::configure(120)), SendOutcome::Delivered);

        assert!(drain(&mut rx_a).is_empty());
        let received = drain(&mut rx_b);
        assert_eq!(received.len(), 1);
        let TransportEvent::MessageReceived(command) = &received[0] else {
            panic!("expected message, got {received:?}");
        };
        assert_eq!(command.action, Action::Ping);
        assert_eq!(command.bpm_threshold(), Some(120));
    }

    #[test]
    fn should_fail_a_single_send_on_request() {
        let (a, _b, control) = pair();
        control.activate();
        control.fail_next_send(Side::A, "radio busy");

        assert_eq!(
            a.send(&Command::stop_alarm()),
            SendOutcome::Failed("radio busy".into())
        );
        assert_eq!(a.send(&Command::stop_alarm()), SendOutcome::Delivered);
    }

    #[test]
    fn should_drop_malformed_injected_frames() {
        let (mut a, _b, control) = pair();
        let mut rx_a = a.take_event_receiver().unwrap();

        control.inject(Side::A, r#"{"bpmThreshold":120}"#);
        control.inject(Side::A, "not json");
        control.inject(Side::A, r#"{"action":"stopAlarm"}"#);

        assert_eq!(
            drain(&mut rx_a),
            vec![TransportEvent::MessageReceived(Command::stop_alarm())]
        );
    }

    #[test]
    fn should_hand_out_event_receiver_once() {
        let (mut a, _b, _control) = pair();

        assert!(a.take_event_receiver().is_some());
        assert!(a.take_event_receiver().is_none());
    }
}
