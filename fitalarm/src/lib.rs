//! Alarm coordination engine for a wearable fitness alarm.
//!
//! Two paired endpoints (the wearable sensor node and its companion) each
//! run an [`endpoint::Endpoint`]: a single event loop that smooths sensor
//! samples, detects threshold crossings and scheduled times, drives the
//! alarm state machine, and keeps the peer informed over a best-effort
//! message channel.

pub mod alarm;
pub mod api;
pub mod api_client;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod feedback;
pub mod protocol;
pub mod sensor;
pub mod tracing;
pub mod transport;
