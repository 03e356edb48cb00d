//! Sensor-side processing: sample smoothing and liveness tracking.

mod smoother;
mod watchdog;

pub use smoother::{DEFAULT_WINDOW_SIZE, SampleSmoother};
pub use watchdog::{SensorStatus, SensorWatchdog, WatchdogEdge};

use serde::Serialize;
use tokio::time::Instant;

/// A single raw reading pushed by the sensor source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub timestamp: Instant,
}

impl Sample {
    /// Create a sample stamped with the current instant.
    pub fn now(value: f64) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
        }
    }
}

/// Moving average over the most recent samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothedReading {
    pub average: f64,
    pub sample_count: usize,
}
