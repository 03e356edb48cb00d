//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients. Enumerations travel as their display names so clients do not
//! need the engine's types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Alarm status of one endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct AlarmView {
    /// Endpoint name (`wearable` or `companion`).
    pub name: String,
    /// `Idle`, `Armed`, `Triggered` or `Stopping`.
    pub state: String,
    /// What triggered the alarm while it rings: `Sensor`, `Schedule` or
    /// `Remote`.
    pub cause: Option<String>,
    pub bpm_threshold: Option<u32>,
    /// Scheduled time of day, `HH:MM`.
    pub scheduled_time: Option<String>,
    /// Smoothed heart rate, beats per minute.
    pub average_bpm: Option<f64>,
    pub sample_count: usize,
    /// `Available` or `Unavailable`.
    pub sensor: String,
    pub session: SessionView,
    /// Outcome of the last command sent to the peer.
    pub last_send: Option<String>,
}

/// Link to the peer endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct SessionView {
    pub reachable: bool,
    pub activation_state: String,
}

/// Request body for `PATCH /api/v0/alarm`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct AlarmPatchRequest {
    /// Arm (or re-arm with new settings) when true, disarm when false.
    pub armed: bool,
    /// Required to arm unless a threshold is already configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm_threshold: Option<u32>,
    /// `HH:MM`, 24 hour clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
}

/// Request body for `POST /api/v0/samples`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct SampleRequest {
    /// Heart rate, beats per minute.
    pub value: f64,
}
