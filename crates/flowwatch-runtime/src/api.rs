//! Client for the classification service's HTTP API.
//!
//! [`ControlApi`] is the seam the orchestrator and the history loader talk
//! through; [`HttpControlApi`] is the `reqwest` implementation used in
//! production.

use std::time::Duration;

use async_trait::async_trait;
use flowwatch_core::error::{FlowwatchError, Result};
use flowwatch_core::protocol::{
    Ack, ErrorBody, FlowInput, FlowRecord, PredictionResponse, ServerStats, StartResponse,
    StatusReport,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── ControlApi ────────────────────────────────────────────────────────────────

/// Control, query and classification operations offered by the service.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Current sniffer status.
    async fn status(&self) -> Result<StatusReport>;

    /// Ask the service to start capturing.
    async fn start(&self) -> Result<StartResponse>;

    /// Ask the service to stop capturing.
    async fn stop(&self) -> Result<Ack>;

    /// Bind the sniffer to another interface.
    async fn set_interface(&self, name: &str) -> Result<Ack>;

    /// Most recent classified flows, newest first, at most `limit`.
    async fn history(&self, limit: u32) -> Result<Vec<FlowRecord>>;

    /// The service's own aggregate over its event store.
    async fn server_stats(&self) -> Result<ServerStats>;

    /// Classify a single flow described by the caller.
    async fn predict_flow(&self, input: &FlowInput) -> Result<PredictionResponse>;
}

// ── HttpControlApi ────────────────────────────────────────────────────────────

/// [`ControlApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpControlApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlApi {
    /// Client for the service at `base_url` (e.g. `http://localhost:8000`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlowwatchError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        tracing::trace!(path, "GET");
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| FlowwatchError::Http(e.to_string()))?;
        decode(response).await
    }

    async fn post_json<T, B>(&self, path: &str, query: &[(&str, String)], body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        tracing::trace!(path, "POST");
        let mut request = self.client.post(self.url(path)).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FlowwatchError::Http(e.to_string()))?;
        decode(response).await
    }
}

/// Turn a response into `T`, or into [`FlowwatchError::Rejected`] carrying the
/// service's `detail` text for non-success statuses.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FlowwatchError::Http(e.to_string()))?;

    if !status.is_success() {
        let message = match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => body.message(),
            Err(_) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request rejected")
                .to_string(),
        };
        tracing::debug!(status = status.as_u16(), %message, "service rejected request");
        return Err(FlowwatchError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn status(&self) -> Result<StatusReport> {
        self.get_json("/api/health/", &[]).await
    }

    async fn start(&self) -> Result<StartResponse> {
        self.post_json::<_, ()>("/api/health/sniffer/start", &[], None)
            .await
    }

    async fn stop(&self) -> Result<Ack> {
        self.post_json::<_, ()>("/api/health/sniffer/stop", &[], None)
            .await
    }

    async fn set_interface(&self, name: &str) -> Result<Ack> {
        self.post_json::<_, ()>(
            "/api/health/sniffer/interface",
            &[("interface", name.to_string())],
            None,
        )
        .await
    }

    async fn history(&self, limit: u32) -> Result<Vec<FlowRecord>> {
        self.get_json("/api/predictions/history", &[("limit", limit.to_string())])
            .await
    }

    async fn server_stats(&self) -> Result<ServerStats> {
        self.get_json("/api/stats/", &[]).await
    }

    async fn predict_flow(&self, input: &FlowInput) -> Result<PredictionResponse> {
        self.post_json("/api/predictions/predict-flow", &[], Some(input))
            .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
