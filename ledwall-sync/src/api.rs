//! HTTP API client for the initial LED fetch and the REST update path.

use chrono::{DateTime, Utc};
use ledwall_core::{Color, SnapshotEntry};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{RetryConfig, SyncConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Fetch failed: HTTP {status} {status_text}")]
    FetchFailed { status: u16, status_text: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Network errors, 5xx and 429 are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::FetchFailed { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

/// One LED as returned by `GET /leds`.
///
/// The device names the timestamp `last_updated`; both spellings are
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedRecord {
    pub color: Color,
    #[serde(alias = "last_updated")]
    pub timestamp: DateTime<Utc>,
}

impl From<LedRecord> for SnapshotEntry {
    fn from(record: LedRecord) -> Self {
        SnapshotEntry::new(record.color, record.timestamp)
    }
}

impl From<SnapshotEntry> for LedRecord {
    fn from(entry: SnapshotEntry) -> Self {
        Self {
            color: entry.color,
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET {base}/leds`, one record per LED in index order.
    pub async fn fetch_leds(&self) -> Result<Vec<LedRecord>, ApiError> {
        self.get_json("leds").await
    }

    /// [`fetch_leds`](Self::fetch_leds) with bounded retry and backoff.
    pub async fn fetch_leds_with_retry(&self, retry: &RetryConfig) -> Result<Vec<LedRecord>, ApiError> {
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.fetch_leds().await {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    log::warn!(
                        "Fetching LEDs failed ({e}), retrying in {}ms (attempt {}/{attempts})",
                        delay.as_millis(),
                        attempt + 2
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `GET {base}/leds/{id}`.
    pub async fn fetch_led(&self, id: usize) -> Result<LedRecord, ApiError> {
        self.get_json(&format!("leds/{id}")).await
    }

    /// `POST {base}/leds/{id}` with a form-encoded `red, green, blue` body.
    pub async fn set_led(&self, id: usize, color: Color) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url(&format!("leds/{id}")))
            .form(&color)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        check_status(resp)?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let text = check_status(resp)?
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(ApiError::FetchFailed {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
    })
}
