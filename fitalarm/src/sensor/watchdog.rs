//! Sample liveness tracking.
//!
//! The sensor source may never deliver anything (not authorized, not
//! worn, no hardware), or may stop mid-session. Neither is an error: the
//! endpoint simply cannot use the sensor trigger until samples flow again.
//!
//! ```text
//!              sample()                     check(), silent >= timeout
//!  Unavailable ────────► Available ─────────────────────────────────► Unavailable
//!       ▲                    │ ▲                                          │
//!       │                    └─┘ sample() refreshes                       │
//!       └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both methods return a [`WatchdogEdge`] so callers act exactly once on
//! each change.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum SensorStatus {
    Available,
    Unavailable,
}

/// Result of feeding the watchdog, describing any change just observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEdge {
    /// Nothing changed.
    Steady,

    /// Samples started arriving (or resumed after a gap).
    BecameAvailable,

    /// No sample for at least the timeout. Returned once per gap.
    BecameUnavailable,
}

#[derive(Debug)]
pub struct SensorWatchdog {
    timeout: Duration,
    last_sample: Option<Instant>,
    status: SensorStatus,
}

impl SensorWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_sample: None,
            status: SensorStatus::Unavailable,
        }
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    /// Record that a sample arrived at `at`.
    pub fn sample(&mut self, at: Instant) -> WatchdogEdge {
        self.last_sample = Some(at);
        match self.status {
            SensorStatus::Available => WatchdogEdge::Steady,
            SensorStatus::Unavailable => {
                self.status = SensorStatus::Available;
                WatchdogEdge::BecameAvailable
            }
        }
    }

    /// Periodic check; reports the sensor gone quiet once the timeout passes.
    pub fn check(&mut self, now: Instant) -> WatchdogEdge {
        match (self.status, self.last_sample) {
            (SensorStatus::Available, Some(last))
                if now.saturating_duration_since(last) >= self.timeout =>
            {
                self.status = SensorStatus::Unavailable;
                WatchdogEdge::BecameUnavailable
            }
            _ => WatchdogEdge::Steady,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use super::*;

    // start_paused keeps Instant::now() deterministic; time::advance()
    // drives the clock.

    #[tokio::test(start_paused = true)]
    async fn starts_unavailable_and_stays_quiet_without_samples() {
        let mut watchdog = SensorWatchdog::new(Duration::from_secs(30));
        assert_eq!(watchdog.status(), SensorStatus::Unavailable);

        time::advance(Duration::from_secs(120)).await;
        assert_eq!(watchdog.check(Instant::now()), WatchdogEdge::Steady);
    }

    #[tokio::test(start_paused = true)]
    async fn first_sample_makes_available_once() {
        let mut watchdog = SensorWatchdog::new(Duration::from_secs(30));

        assert_eq!(
            watchdog.sample(Instant::now()),
            WatchdogEdge::BecameAvailable
        );
        assert_eq!(watchdog.sample(Instant::now()), WatchdogEdge::Steady);
        assert_eq!(watchdog.status(), SensorStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn goes_unavailable_after_timeout() {
        let mut watchdog = SensorWatchdog::new(Duration::from_secs(30));
        watchdog.sample(Instant::now());

        time::advance(Duration::from_secs(29)).await;
        assert_eq!(watchdog.check(Instant::now()), WatchdogEdge::Steady);

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            watchdog.check(Instant::now()),
            WatchdogEdge::BecameUnavailable
        );
        assert_eq!(watchdog.check(Instant::now()), WatchdogEdge::Steady);
        assert_eq!(watchdog.status(), SensorStatus::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_keep_it_alive() {
        let mut watchdog = SensorWatchdog::new(Duration::from_secs(30));
        watchdog.sample(Instant::now());

        for _ in 0..5 {
            time::advance(Duration::from_secs(20)).await;
            watchdog.sample(Instant::now());
            assert_eq!(watchdog.check(Instant::now()), WatchdogEdge::Steady);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_gap() {
        let mut watchdog = SensorWatchdog::new(Duration::from_secs(30));
        watchdog.sample(Instant::now());
        time::advance(Duration::from_secs(31)).await;
        watchdog.check(Instant::now());

        assert_eq!(
            watchdog.sample(Instant::now()),
            WatchdogEdge::BecameAvailable
        );
    }
}
