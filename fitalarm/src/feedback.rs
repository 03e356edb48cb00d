//! Local alarm feedback (sound and haptics).
//!
//! Playback lives outside the engine. The state machine only asks a
//! [`FeedbackDevice`] to start or stop and logs any failure; a failing
//! speaker never holds up or reverses a state change.

use async_trait::async_trait;

use crate::tracing::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Continuous sound/haptic output. Both calls must be idempotent.
#[async_trait]
pub trait FeedbackDevice: Send {
    async fn start_continuous_feedback(&mut self) -> Result<(), FeedbackError>;

    async fn stop_feedback(&mut self) -> Result<(), FeedbackError>;
}

/// Feedback device that only records to the log.
///
/// Used by the daemon when no playback hardware is attached.
#[derive(Debug, Default)]
pub struct LogFeedback {
    active: bool,
}

impl LogFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[async_trait]
impl FeedbackDevice for LogFeedback {
    async fn start_continuous_feedback(&mut self) -> Result<(), FeedbackError> {
        if !self.active {
            self.active = true;
            warn!("ALARM: feedback started");
        }
        Ok(())
    }

    async fn stop_feedback(&mut self) -> Result<(), FeedbackError> {
        if self.active {
            self.active = false;
            info!("Alarm feedback stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FeedbackCall {
        Start,
        Stop,
    }

    /// Records calls; optionally fails every call after recording it.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingFeedback {
        calls: Arc<Mutex<Vec<FeedbackCall>>>,
        failing: bool,
    }

    impl RecordingFeedback {
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<FeedbackCall> {
            self.calls.lock().clone()
        }

        fn record(&self, call: FeedbackCall) -> Result<(), FeedbackError> {
            self.calls.lock().push(call);
            if self.failing {
                Err(FeedbackError::Playback("speaker disconnected".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl FeedbackDevice for RecordingFeedback {
        async fn start_continuous_feedback(&mut self) -> Result<(), FeedbackError> {
            self.record(FeedbackCall::Start)
        }

        async fn stop_feedback(&mut self) -> Result<(), FeedbackError> {
            self.record(FeedbackCall::Stop)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_feedback_tracks_activity_idempotently() {
        let mut feedback = LogFeedback::new();

        feedback.start_continuous_feedback().await.unwrap();
        feedback.start_continuous_feedback().await.unwrap();
        assert!(feedback.is_active());

        feedback.stop_feedback().await.unwrap();
        feedback.stop_feedback().await.unwrap();
        assert!(!feedback.is_active());
    }
}
