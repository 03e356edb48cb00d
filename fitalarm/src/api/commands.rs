//! Commands sent from the control surface to an endpoint.
//!
//! Each command carries a oneshot reply channel so the caller can await the
//! result. The reply is the alarm state once the command has been applied.

use anyhow::Result;
use tokio::sync::oneshot;

use crate::alarm::{AlarmConfig, AlarmState};

pub type Reply = oneshot::Sender<Result<AlarmState>>;

#[derive(Debug)]
pub enum EndpointCommand {
    /// Arm with `config`, or replace the configuration if already armed.
    /// Refused while the alarm is ringing or stopping.
    Arm { config: AlarmConfig, reply: Reply },

    /// Return to idle from any state, silencing feedback.
    Disarm { reply: Reply },

    /// Stop a ringing alarm. Refused unless the alarm is ringing.
    Stop { reply: Reply },
}
