//! Best-effort telemetry push to a ThingSpeak channel.
//!
//! Each sample is one form-encoded `POST` over a fresh connection that is
//! closed once the response has been read, or when the response timeout
//! runs out. A lost sample has no effect on irrigation, so nothing is retried.

use anyhow::{bail, Context, Result};
use reqwest::header::CONNECTION;
use reqwest::Client;
use std::time::Duration;

use crate::config::TelemetryConfig;

/// One telemetry triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature: f32,
    pub humidity: f32,
    pub moisture: i32,
}

pub trait TelemetryPublisher {
    async fn publish(&mut self, sample: &Sample) -> Result<()>;
}

/// `api_key`, then `field1..3` = temperature, humidity, moisture.
pub fn form_fields(api_key: &str, sample: &Sample) -> [(&'static str, String); 4] {
    [
        ("api_key", api_key.to_string()),
        ("field1", format!("{:.2}", sample.temperature)),
        ("field2", format!("{:.2}", sample.humidity)),
        ("field3", sample.moisture.to_string()),
    ]
}

pub struct ThingSpeak {
    http: Client,
    url: String,
    api_key: String,
}

impl ThingSpeak {
    /// `response_timeout` bounds the whole exchange, connect included.
    pub fn new(cfg: &TelemetryConfig, response_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(response_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            url: format!("http://{}:{}{}", cfg.host, cfg.port, cfg.path),
            api_key: cfg.api_key.clone(),
        })
    }
}

impl TelemetryPublisher for ThingSpeak {
    async fn publish(&mut self, sample: &Sample) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .header(CONNECTION, "close")
            .form(&form_fields(&self.api_key, sample))
            .send()
            .await
            .with_context(|| format!("telemetry post to {} failed", self.url))?;

        let status = resp.status();
        let body = resp.text().await.context("telemetry receive failed")?;
        check_response(status, &body)?;

        tracing::debug!(
            temperature = sample.temperature,
            humidity = sample.humidity,
            moisture = sample.moisture,
            entry = body.trim(),
            "telemetry published"
        );
        Ok(())
    }
}

/// Accept a 2xx status whose body is not ThingSpeak's `0` (update refused,
/// usually the channel rate limit).
fn check_response(status: reqwest::StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        bail!("telemetry rejected: {status}");
    }
    if body.trim() == "0" {
        bail!("telemetry update refused by channel");
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
