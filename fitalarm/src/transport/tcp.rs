//! TCP link between two daemons.
//!
//! One side listens and the other connects. Commands travel as
//! newline-delimited JSON ([`CommandCodec`]). The peer is reachable while a
//! connection is up; the connecting side retries with jittered exponential
//! backoff after every failure or disconnect.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::{
    ActivationState, EVENT_QUEUE_DEPTH, MessageChannel, SendOutcome, Session, TransportEvent,
    check_session,
};
use crate::error::Result;
use crate::protocol::{Command, CommandCodec};
use crate::tracing::prelude::*;

/// Commands queued for the link task before sends start failing.
const OUTBOUND_QUEUE_DEPTH: usize = 32;

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpRole {
    Listen(SocketAddr),
    Connect(SocketAddr),
}

impl std::fmt::Display for TcpRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpRole::Listen(addr) => write!(f, "listen {addr}"),
            TcpRole::Connect(addr) => write!(f, "connect {addr}"),
        }
    }
}

/// Reconnect delays: doubling from `initial` up to `max`, each scaled by a
/// random factor in [0.5, 1.0).
#[derive(Debug)]
struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
    seed: RandomState,
}

impl ReconnectBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
            seed: RandomState::new(),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        let nominal = self.initial.saturating_mul(factor).min(self.max);

        let mut hasher = self.seed.build_hasher();
        hasher.write_u32(self.attempt);
        let unit = hasher.finish() as f64 / u64::MAX as f64;
        self.attempt = self.attempt.saturating_add(1);

        nominal.mul_f64(0.5 + unit * 0.5)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// [`MessageChannel`] over a single TCP connection.
pub struct TcpChannel {
    role: TcpRole,
    local_addr: Option<SocketAddr>,
    session: watch::Receiver<Session>,
    outbound: mpsc::Sender<Command>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl TcpChannel {
    /// Start the link task.
    ///
    /// For [`TcpRole::Listen`] the address is bound before returning, so a
    /// port conflict surfaces here rather than in the background.
    pub async fn start(role: TcpRole, shutdown: CancellationToken) -> Result<Self> {
        let listener = match role {
            TcpRole::Listen(addr) => Some(TcpListener::bind(addr).await?),
            TcpRole::Connect(_) => None,
        };
        let local_addr = listener.as_ref().map(|l| l.local_addr()).transpose()?;

        let (session_tx, session_rx) = watch::channel(Session {
            reachable: false,
            activation_state: ActivationState::Activated,
        });
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        // Nothing left to activate once the socket side is ready.
        if let Err(e) = events_tx.try_send(TransportEvent::ActivationComplete(
            ActivationState::Activated,
        )) {
            debug!(error = %e, "Dropped activation event");
        }

        let task = LinkTask {
            role,
            listener,
            session: session_tx,
            events: events_tx,
            outbound: outbound_rx,
            shutdown,
            backoff: ReconnectBackoff::new(RECONNECT_INITIAL, RECONNECT_MAX),
        };
        tokio::spawn(task.run());

        info!(role = %role, local = ?local_addr, "TCP link started");

        Ok(Self {
            role,
            local_addr,
            session: session_rx,
            outbound: outbound_tx,
            events: Some(events_rx),
        })
    }

    pub fn role(&self) -> TcpRole {
        self.role
    }

    /// Bound address when listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl MessageChannel for TcpChannel {
    fn session(&self) -> Session {
        *self.session.borrow()
    }

    fn send(&self, command: &Command) -> SendOutcome {
        if let Err(outcome) = check_session(self.session()) {
            return outcome;
        }
        match self.outbound.try_send(command.clone()) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Failed("send queue full".into()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                SendOutcome::Failed("link task stopped".into())
            }
        }
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }
}

struct LinkTask {
    role: TcpRole,
    listener: Option<TcpListener>,
    session: watch::Sender<Session>,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    backoff: ReconnectBackoff,
}

enum Disconnect {
    Closed,
    Shutdown,
    EndpointGone,
}

impl LinkTask {
    async fn run(mut self) {
        let shutdown = self.shutdown.clone();

        loop {
            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.establish() => result,
            };

            let delay = match connected {
                Ok((stream, peer)) => {
                    self.backoff.reset();
                    info!(peer = %peer, "Peer connected");
                    if !self.set_reachable(true).await {
                        break;
                    }

                    let reason = self.serve(stream).await;
                    info!(peer = %peer, "Peer disconnected");
                    self.discard_stale_outbound();

                    match reason {
                        Disconnect::Closed => {
                            if !self.set_reachable(false).await {
                                break;
                            }
                        }
                        Disconnect::Shutdown | Disconnect::EndpointGone => break,
                    }

                    match self.role {
                        TcpRole::Connect(_) => self.backoff.next_delay(),
                        TcpRole::Listen(_) => continue,
                    }
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(role = %self.role, error = %e, retry_in = ?delay, "Peer connection failed");
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.session.send_modify(|s| s.reachable = false);
        debug!(role = %self.role, "TCP link task stopped");
    }

    async fn establish(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        match (&self.listener, self.role) {
            (Some(listener), _) => listener.accept().await,
            (None, TcpRole::Connect(addr)) => {
                let stream = TcpStream::connect(addr).await?;
                Ok((stream, addr))
            }
            (None, TcpRole::Listen(_)) => std::future::pending().await,
        }
    }

    async fn serve(&mut self, stream: TcpStream) -> Disconnect {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let mut framed = Framed::new(stream, CommandCodec::default());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Disconnect::Shutdown,

                frame = framed.next() => match frame {
                    Some(Ok(Ok(command))) => {
                        trace!(action = %command.action, "Frame received");
                        if self.events.send(TransportEvent::MessageReceived(command)).await.is_err() {
                            return Disconnect::EndpointGone;
                        }
                    }
                    Some(Ok(Err(e))) => {
                        debug!(error = %e, "Dropping malformed frame");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Link read failed");
                        return Disconnect::Closed;
                    }
                    None => return Disconnect::Closed,
                },

                Some(command) = self.outbound.recv() => {
                    if let Err(e) = framed.send(command).await {
                        warn!(error = %e, "Link write failed");
                        return Disconnect::Closed;
                    }
                }
            }
        }
    }

    /// Publish a reachability change. Returns false once the endpoint has
    /// dropped its receiver.
    async fn set_reachable(&mut self, reachable: bool) -> bool {
        self.session.send_modify(|s| s.reachable = reachable);
        self.events
            .send(TransportEvent::ReachabilityChanged(reachable))
            .await
            .is_ok()
    }

    fn discard_stale_outbound(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded commands queued for a closed link");
        }
    }
}
