//! HTTP client for the control API.

pub mod types;

use anyhow::{Context, Result, bail};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use types::{AlarmPatchRequest, AlarmView, SampleRequest};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7790";

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.base_url, path)
    }

    pub async fn get_alarm(&self) -> Result<AlarmView> {
        json(self.http.get(self.url("/alarm"))).await
    }

    pub async fn arm(&self, bpm_threshold: u32, scheduled_time: Option<String>) -> Result<AlarmView> {
        self.patch_alarm(&AlarmPatchRequest {
            armed: true,
            bpm_threshold: Some(bpm_threshold),
            scheduled_time,
        })
        .await
    }

    pub async fn disarm(&self) -> Result<AlarmView> {
        self.patch_alarm(&AlarmPatchRequest::default()).await
    }

    pub async fn patch_alarm(&self, request: &AlarmPatchRequest) -> Result<AlarmView> {
        json(self.http.patch(self.url("/alarm")).json(request)).await
    }

    pub async fn stop(&self) -> Result<AlarmView> {
        json(self.http.post(self.url("/alarm/stop"))).await
    }

    pub async fn push_sample(&self, value: f64) -> Result<()> {
        send(self.http.post(self.url("/samples")).json(&SampleRequest { value })).await?;
        Ok(())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.context("API request failed")?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if body.is_empty() {
            bail!("API returned {status}");
        }
        bail!("API returned {status}: {body}");
    }
    Ok(response)
}

async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    send(request)
        .await?
        .json()
        .await
        .context("Malformed API response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_versioned_urls() {
        let client = Client::with_base_url("http://10.0.0.2:7790/");

        assert_eq!(client.url("/alarm"), "http://10.0.0.2:7790/api/v0/alarm");
    }

    #[test]
    fn disarm_request_should_omit_optional_fields() {
        let body = serde_json::to_value(AlarmPatchRequest::default()).unwrap();

        assert_eq!(body, serde_json::json!({"armed": false}));
    }
}
