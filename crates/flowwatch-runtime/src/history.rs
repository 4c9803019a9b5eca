//! History loader.
//!
//! Fetches the service's recent-flows snapshot and hands it to the
//! [`FlowAggregator`] as a full replacement of the view. Transient network
//! failures are retried up to three times with a short linear back-off; a
//! load that ultimately fails leaves the current view untouched.

use std::sync::Arc;
use std::time::Duration;

use flowwatch_core::error::{FlowwatchError, Result};
use flowwatch_core::protocol::FlowRecord;
use flowwatch_data::aggregator::FlowAggregator;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::api::ControlApi;

/// Default number of history records requested.
pub const DEFAULT_HISTORY_LIMIT: u32 = 1000;

/// Fetch attempts before giving up.
const MAX_RETRY_ATTEMPTS: u32 = 3;

pub struct HistoryLoader {
    api: Arc<dyn ControlApi>,
    limit: u32,
    last_error: Mutex<Option<String>>,
    last_successful_fetch: Mutex<Option<Instant>>,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn ControlApi>, limit: u32) -> Self {
        Self {
            api,
            limit,
            last_error: Mutex::new(None),
            last_successful_fetch: Mutex::new(None),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Fetch the snapshot, retrying transient failures.
    ///
    /// Back-off schedule: attempt 1 → 0 ms, attempt 2 → 100 ms, attempt 3 → 200 ms.
    /// A rejection by the service is not retried.
    pub async fn fetch(&self) -> Result<Vec<FlowRecord>> {
        let mut last_err: Option<FlowwatchError> = None;

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                let sleep_ms = u64::from(attempt) * 100;
                tracing::debug!(attempt, sleep_ms, "retrying history fetch after back-off");
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            }

            match self.api.history(self.limit).await {
                Ok(records) => {
                    *self.last_successful_fetch.lock() = Some(Instant::now());
                    *self.last_error.lock() = None;
                    return Ok(records);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt, error = %e, "history fetch attempt failed");
                    last_err = Some(e);
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        let err = last_err.unwrap_or_else(|| FlowwatchError::Http("history fetch failed".into()));
        *self.last_error.lock() = Some(err.to_string());
        Err(err)
    }

    /// Fetch the snapshot and replace the aggregator's view with it.
    ///
    /// Returns the number of records applied. On failure the aggregator is
    /// not touched.
    pub async fn load_into(&self, aggregator: &Mutex<FlowAggregator>) -> Result<usize> {
        let records = match self.fetch().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "history load failed; keeping current view");
                return Err(e);
            }
        };
        let count = records.len();
        aggregator.lock().apply_snapshot(records);
        tracing::debug!(records = count, "history snapshot applied");
        Ok(count)
    }

    /// Description of the last failed load, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Time since the last successful fetch, or `None` before the first one.
    pub fn since_last_success(&self) -> Option<Duration> {
        self.last_successful_fetch.lock().map(|ts| ts.elapsed())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
