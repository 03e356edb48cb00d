//! API v0 endpoints.
//!
//! Version 0 signals an unstable API; breaking changes are expected.

use std::time::Duration;

use axum::{Json, extract::State, http::StatusCode};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::commands::{EndpointCommand, Reply};
use super::server::SharedState;
use crate::alarm::{AlarmConfig, AlarmState, format_time_of_day, parse_time_of_day};
use crate::api_client::types::{AlarmPatchRequest, AlarmView, SampleRequest, SessionView};
use crate::endpoint::EndpointStatus;
use crate::error::Error;
use crate::tracing::prelude::*;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

type ApiError = (StatusCode, String);

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_alarm, patch_alarm))
        .routes(routes!(stop_alarm))
        .routes(routes!(post_sample))
}

pub(crate) fn alarm_view(status: &EndpointStatus) -> AlarmView {
    let config = status.config.as_ref();
    AlarmView {
        name: status.name.clone(),
        state: status.state.to_string(),
        cause: status.cause.map(|c| c.to_string()),
        bpm_threshold: config.map(|c| c.bpm_threshold),
        scheduled_time: config
            .and_then(|c| c.scheduled_time)
            .map(format_time_of_day),
        average_bpm: status.reading.map(|r| r.average),
        sample_count: status.reading.map_or(0, |r| r.sample_count),
        sensor: status.sensor.to_string(),
        session: SessionView {
            reachable: status.session.reachable,
            activation_state: status.session.activation_state.to_string(),
        },
        last_send: status.last_send.as_ref().map(|o| o.to_string()),
    }
}

/// Send a command to the endpoint and wait for it to be applied.
///
/// A refusal from the endpoint is a conflict with the current alarm state;
/// anything else means the endpoint is gone or stuck.
async fn dispatch(
    state: &SharedState,
    command: impl FnOnce(Reply) -> EndpointCommand,
) -> Result<AlarmState, ApiError> {
    let Ok(result) = tokio::time::timeout(COMMAND_TIMEOUT, state.endpoint.request(command)).await
    else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "endpoint did not respond".into(),
        ));
    };

    result.map_err(|e| {
        if e.downcast_ref::<Error>().is_some() {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        } else {
            debug!(error = %e, "Command refused");
            (StatusCode::CONFLICT, e.to_string())
        }
    })
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return the current alarm status.
#[utoipa::path(
    get,
    path = "/alarm",
    tag = "alarm",
    responses(
        (status = OK, description = "Current alarm status", body = AlarmView),
    ),
)]
async fn get_alarm(State(state): State<SharedState>) -> Json<AlarmView> {
    Json(state.alarm_view())
}

/// Arm, re-arm or disarm the alarm.
#[utoipa::path(
    patch,
    path = "/alarm",
    tag = "alarm",
    request_body = AlarmPatchRequest,
    responses(
        (status = OK, description = "Updated alarm status", body = AlarmView),
        (status = BAD_REQUEST, description = "Invalid threshold or time"),
        (status = CONFLICT, description = "Alarm is ringing"),
        (status = INTERNAL_SERVER_ERROR, description = "Endpoint not responding"),
    ),
)]
async fn patch_alarm(
    State(state): State<SharedState>,
    Json(req): Json<AlarmPatchRequest>,
) -> Result<Json<AlarmView>, ApiError> {
    if !req.armed {
        dispatch(&state, |reply| EndpointCommand::Disarm { reply }).await?;
        return Ok(Json(state.alarm_view()));
    }

    let known = state.endpoint.status().config.map(|c| c.bpm_threshold);
    let bpm_threshold = match req.bpm_threshold.or(known) {
        Some(0) => return Err((StatusCode::BAD_REQUEST, "bpm_threshold must be positive".into())),
        Some(bpm) => bpm,
        None => return Err((StatusCode::BAD_REQUEST, "bpm_threshold is required".into())),
    };

    let mut config = AlarmConfig::new(bpm_threshold);
    if let Some(text) = &req.scheduled_time {
        let at = parse_time_of_day(text).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("scheduled_time {text:?}: {e}"),
            )
        })?;
        config = config.with_scheduled_time(at);
    }

    dispatch(&state, |reply| EndpointCommand::Arm { config, reply }).await?;
    Ok(Json(state.alarm_view()))
}

/// Stop the ringing alarm.
#[utoipa::path(
    post,
    path = "/alarm/stop",
    tag = "alarm",
    responses(
        (status = OK, description = "Updated alarm status", body = AlarmView),
        (status = CONFLICT, description = "Alarm is not ringing"),
        (status = INTERNAL_SERVER_ERROR, description = "Endpoint not responding"),
    ),
)]
async fn stop_alarm(State(state): State<SharedState>) -> Result<Json<AlarmView>, ApiError> {
    dispatch(&state, |reply| EndpointCommand::Stop { reply }).await?;
    Ok(Json(state.alarm_view()))
}

/// Push one heart rate sample.
#[utoipa::path(
    post,
    path = "/samples",
    tag = "sensor",
    request_body = SampleRequest,
    responses(
        (status = ACCEPTED, description = "Sample queued"),
        (status = BAD_REQUEST, description = "Value is negative or not a number"),
        (status = INTERNAL_SERVER_ERROR, description = "Endpoint not running"),
    ),
)]
async fn post_sample(
    State(state): State<SharedState>,
    Json(req): Json<SampleRequest>,
) -> Result<StatusCode, ApiError> {
    if !req.value.is_finite() || req.value < 0.0 {
        return Err((StatusCode::BAD_REQUEST, "value must be a finite, non-negative number".into()));
    }

    state
        .endpoint
        .push_sample(req.value)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Method, Request};
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::api::server;
    use crate::endpoint::{Endpoint, EndpointSettings};
    use crate::feedback::testing::RecordingFeedback;
    use crate::transport::loopback;

    struct Harness {
        app: axum::Router,
        shutdown: CancellationToken,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    fn harness() -> Harness {
        let (a, b, link) = loopback::pair();
        link.activate();
        let mut settings = EndpointSettings::new("wearable");
        settings.window_size = 1;
        let (endpoint, handle) =
            Endpoint::new(settings, Box::new(a), Box::new(RecordingFeedback::default())).unwrap();

        let shutdown = CancellationToken::new();
        tokio::spawn(endpoint.run(shutdown.clone()));
        // Keep the peer end open for the endpoint's lifetime.
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                drop(b);
            }
        });

        Harness {
            app: server::router(SharedState::new(handle)),
            shutdown,
        }
    }

    async fn call(
        app: &axum::Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn view(body: &[u8]) -> AlarmView {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn should_answer_health() {
        let h = harness();

        let (status, body) = call(&h.app, Method::GET, "/api/v0/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn should_report_idle_alarm() {
        let h = harness();

        let (status, body) = call(&h.app, Method::GET, "/api/v0/alarm", None).await;

        assert_eq!(status, StatusCode::OK);
        let alarm = view(&body);
        assert_eq!(alarm.name, "wearable");
        assert_eq!(alarm.state, "Idle");
        assert_eq!(alarm.bpm_threshold, None);
        assert_eq!(alarm.sensor, "Unavailable");
    }

    #[tokio::test]
    async fn should_arm_and_disarm() {
        let h = harness();

        let (status, body) = call(
            &h.app,
            Method::PATCH,
            "/api/v0/alarm",
            Some(serde_json::json!({"armed": true, "bpm_threshold": 120, "scheduled_time": "07:15"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let alarm = view(&body);
        assert_eq!(alarm.state, "Armed");
        assert_eq!(alarm.bpm_threshold, Some(120));
        assert_eq!(alarm.scheduled_time.as_deref(), Some("07:15"));

        let (status, body) = call(
            &h.app,
            Method::PATCH,
            "/api/v0/alarm",
            Some(serde_json::json!({"armed": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view(&body).state, "Idle");
    }

    #[tokio::test]
    async fn should_reject_bad_arm_requests() {
        let h = harness();

        let (status, _) = call(
            &h.app,
            Method::PATCH,
            "/api/v0/alarm",
            Some(serde_json::json!({"armed": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &h.app,
            Method::PATCH,
            "/api/v0/alarm",
            Some(serde_json::json!({"armed": true, "bpm_threshold": 110, "scheduled_time": "7pm"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn should_conflict_when_stopping_a_silent_alarm() {
        let h = harness();

        let (status, _) = call(&h.app, Method::POST, "/api/v0/alarm/stop", None).await;

        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn should_trigger_from_pushed_sample_and_stop() {
        let h = harness();
        call(
            &h.app,
            Method::PATCH,
            "/api/v0/alarm",
            Some(serde_json::json!({"armed": true, "bpm_threshold": 100})),
        )
        .await;

        let (status, _) = call(
            &h.app,
            Method::POST,
            "/api/v0/samples",
            Some(serde_json::json!({"value": 130.0})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // Samples are queued; wait until the loop has handled this one.
        let mut alarm = view(&call(&h.app, Method::GET, "/api/v0/alarm", None).await.1);
        for _ in 0..100 {
            if alarm.state == "Triggered" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            alarm = view(&call(&h.app, Method::GET, "/api/v0/alarm", None).await.1);
        }
        assert_eq!(alarm.state, "Triggered");
        assert_eq!(alarm.cause.as_deref(), Some("Sensor"));
        assert_eq!(alarm.last_send.as_deref(), Some("delivered"));

        let (status, body) = call(&h.app, Method::POST, "/api/v0/alarm/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view(&body).state, "Idle");
    }

    #[tokio::test]
    async fn should_reject_negative_sample() {
        let h = harness();

        let (status, _) = call(
            &h.app,
            Method::POST,
            "/api/v0/samples",
            Some(serde_json::json!({"value": -5.0})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
