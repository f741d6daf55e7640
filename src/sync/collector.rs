//! Collector - transport for one batch of events.

use crate::error::CollectorError;
use crate::event::EventRecord;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote service accepting synced batches.
///
/// Implementations transmit one batch and report whether the collector
/// acknowledged it. A 401 must be reported as `CollectorError::Unauthorized`
/// so the engine can invalidate the credential.
pub trait Collector: Send + Sync {
    /// Collector name (for logs)
    fn name(&self) -> &str;

    /// Transmit a batch. `Ok` carries the acknowledgement body.
    fn send_batch(&self, token: &str, batch: &[EventRecord]) -> Result<Value, CollectorError>;
}

/// Request body of the sync endpoint.
#[derive(Serialize)]
struct SyncRequest<'a> {
    events: &'a [EventRecord],
}

/// Collector reached over HTTP.
pub struct HttpCollector {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpCollector {
    /// Create a collector for `base_url` (e.g. `http://localhost:5000/api`).
    /// Batches are posted to `{base_url}/events/sync`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollectorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tabtrail/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CollectorError::transport)?;

        Ok(Self {
            client,
            endpoint: format!("{}/events/sync", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Collector for HttpCollector {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn send_batch(&self, token: &str, batch: &[EventRecord]) -> Result<Value, CollectorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&SyncRequest { events: batch })
            .send()
            .map_err(CollectorError::transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(CollectorError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CollectorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().map_err(CollectorError::transport)?;
        debug!("[Collector] {} acknowledged batch: {}", status, body);

        serde_json::from_str(&body).map_err(|e| CollectorError::InvalidResponse(e.to_string()))
    }
}
