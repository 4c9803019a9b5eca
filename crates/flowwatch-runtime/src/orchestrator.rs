//! Session orchestrator.
//!
//! [`Dashboard`] wires the push channel, the control orchestrator, the
//! history loader and the flow aggregator into one live session: pushed
//! events stream into the bounded view, history snapshots replace it, and
//! the capture process is driven and reconciled in the background. The
//! presentation layer reads everything it shows from here.

use std::sync::Arc;
use std::time::Duration;

use flowwatch_core::error::Result;
use flowwatch_core::models::{ConnectionState, FlowEvent, MonitoringState, Phase, Stats};
use flowwatch_core::protocol::{FlowInput, FlowRecord, PredictionResponse, ServerStats};
use flowwatch_core::settings::Settings;
use flowwatch_data::aggregator::{FlowAggregator, FLOW_VIEW_CAPACITY};
use flowwatch_data::analysis::AttackSummary;
use flowwatch_data::filter::{self, FlowFilter};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ControlApi, HttpControlApi};
use crate::channel::{ChannelManager, Connector, Subscription, DEFAULT_RECONNECT_DELAY};
use crate::control::{ControlOrchestrator, ControlTiming, InterfaceChange};
use crate::history::{HistoryLoader, DEFAULT_HISTORY_LIMIT};
use crate::transport::WsConnector;

// ── Public types ──────────────────────────────────────────────────────────────

/// Everything needed to open a session against one service.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Push endpoint, e.g. `ws://localhost:8000/api/live`.
    pub push_url: String,
    pub history_limit: u32,
    pub reconnect_delay: Duration,
    pub timing: ControlTiming,
    pub view_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            push_url: "ws://localhost:8000/api/live".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            timing: ControlTiming::default(),
            view_capacity: FLOW_VIEW_CAPACITY,
        }
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url(),
            push_url: settings.push_url(),
            history_limit: settings.history_limit,
            reconnect_delay: Duration::from_secs(settings.reconnect_delay),
            timing: ControlTiming {
                settle_delay: Duration::from_millis(settings.settle_ms),
                interface_settle: Duration::from_millis(settings.interface_settle_ms),
                poll_interval: Duration::from_secs(settings.poll_interval),
            },
            view_capacity: FLOW_VIEW_CAPACITY,
        }
    }
}

/// Point-in-time copy of everything the dashboard displays.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub connection: ConnectionState,
    pub monitoring: MonitoringState,
    pub stats: Stats,
    /// The view, newest first.
    pub flows: Vec<FlowEvent>,
    pub attack_types: Vec<String>,
    pub summary: AttackSummary,
    /// Seconds since history last loaded; `None` before the first load.
    pub history_age_secs: Option<u64>,
}

struct Reconciler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// ── Dashboard ─────────────────────────────────────────────────────────────────

pub struct Dashboard {
    api: Arc<dyn ControlApi>,
    channel: ChannelManager,
    control: Arc<ControlOrchestrator>,
    history: HistoryLoader,
    aggregator: Arc<Mutex<FlowAggregator>>,
    feed: Mutex<Option<Subscription>>,
    reconciler: Mutex<Option<Reconciler>>,
}

impl Dashboard {
    pub fn new(config: &SessionConfig, api: Arc<dyn ControlApi>, connector: Arc<dyn Connector>) -> Self {
        Self {
            channel: ChannelManager::with_reconnect_delay(connector, config.reconnect_delay),
            control: Arc::new(ControlOrchestrator::new(Arc::clone(&api), config.timing.clone())),
            history: HistoryLoader::new(Arc::clone(&api), config.history_limit),
            aggregator: Arc::new(Mutex::new(FlowAggregator::with_capacity(config.view_capacity))),
            feed: Mutex::new(None),
            reconciler: Mutex::new(None),
            api,
        }
    }

    /// Session against a real service: HTTP for control and queries,
    /// WebSocket for the push channel.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let api = Arc::new(HttpControlApi::new(config.base_url.clone())?);
        let connector = Arc::new(WsConnector::new(config.push_url.clone()));
        tracing::debug!(base_url = api.base_url(), push_url = connector.url(), "session endpoints");
        Ok(Self::new(config, api, connector))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Bring the session up: feed pushed events into the view, open the push
    /// channel, learn the capture state, load history and start the
    /// reconciliation poll.
    ///
    /// An unreachable service is logged, not fatal; the push channel keeps
    /// retrying on its own.
    pub async fn init(&self) {
        self.ensure_feed();
        self.channel.connect();

        match self.control.refresh_status().await {
            Ok(state) => tracing::info!(
                phase = %state.phase,
                interface = %state.interface,
                "capture status"
            ),
            Err(e) => tracing::warn!(error = %e, "initial status poll failed"),
        }

        if let Err(e) = self.reload_history().await {
            tracing::debug!(error = %e, "initial history load failed");
        }

        let mut reconciler = self.reconciler.lock();
        if reconciler.is_none() {
            let cancel = CancellationToken::new();
            let handle = self.control.spawn_reconciler(cancel.clone());
            *reconciler = Some(Reconciler { cancel, handle });
        }
    }

    /// Tear the session down. Idempotent.
    pub async fn shutdown(&self) {
        let reconciler = self.reconciler.lock().take();
        if let Some(reconciler) = reconciler {
            reconciler.cancel.cancel();
            if let Err(e) = reconciler.handle.await {
                tracing::debug!(error = %e, "reconciler task ended abnormally");
            }
        }
        self.channel.disconnect().await;
        self.feed.lock().take();
        tracing::debug!("session shut down");
    }

    fn ensure_feed(&self) {
        let mut feed = self.feed.lock();
        if feed.is_some() {
            return;
        }
        let aggregator = Arc::clone(&self.aggregator);
        *feed = Some(self.channel.subscribe(move |record: &FlowRecord| {
            aggregator.lock().apply_push(record.clone());
            Ok(())
        }));
    }

    // ── Operations ────────────────────────────────────────────────────────

    /// Start capture; on success the view is reloaded from history.
    pub async fn start(&self) -> Result<String> {
        let message = self.control.start().await?;
        if let Err(e) = self.reload_history().await {
            tracing::debug!(error = %e, "history reload after start failed");
        }
        Ok(message)
    }

    pub async fn stop(&self) -> Result<String> {
        self.control.stop().await
    }

    /// Switch the capture interface. A restart reloads history like a start.
    pub async fn change_interface(&self, name: &str) -> Result<InterfaceChange> {
        let outcome = self.control.change_interface(name).await?;
        if outcome == InterfaceChange::Restarted {
            if let Err(e) = self.reload_history().await {
                tracing::debug!(error = %e, "history reload after restart failed");
            }
        }
        Ok(outcome)
    }

    /// Poll status and reload history. Both are attempted; the first error
    /// is returned.
    pub async fn manual_refresh(&self) -> Result<()> {
        let status = self.control.refresh_status().await;
        let history = self.reload_history().await;
        status?;
        history?;
        Ok(())
    }

    /// Poll status only.
    pub async fn refresh_status(&self) -> Result<MonitoringState> {
        self.control.refresh_status().await
    }

    /// Replace the view with the service's recent history.
    pub async fn reload_history(&self) -> Result<usize> {
        self.history.load_into(&self.aggregator).await
    }

    pub async fn server_stats(&self) -> Result<ServerStats> {
        self.api.server_stats().await
    }

    /// Classify one flow ad hoc. Rejections carry the service's message
    /// verbatim.
    pub async fn predict_flow(&self, input: &FlowInput) -> Result<PredictionResponse> {
        self.api.predict_flow(input).await
    }

    /// Receive every pushed event alongside the view.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&FlowRecord) -> Result<()> + Send + Sync + 'static,
    {
        self.channel.subscribe(handler)
    }

    // ── State access ──────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    pub fn monitoring(&self) -> MonitoringState {
        self.control.state()
    }

    pub fn phase(&self) -> Phase {
        self.control.phase()
    }

    pub fn watch_monitoring(&self) -> watch::Receiver<MonitoringState> {
        self.control.watch_state()
    }

    /// `true` while a control operation is in flight; controls should be
    /// disabled meanwhile.
    pub fn is_busy(&self) -> bool {
        self.control.is_busy()
    }

    pub fn stats(&self) -> Stats {
        self.aggregator.lock().stats()
    }

    pub fn view(&self) -> Vec<FlowEvent> {
        self.aggregator.lock().to_vec()
    }

    pub fn attack_types(&self) -> Vec<String> {
        self.aggregator.lock().attack_types()
    }

    pub fn selectable_filters(&self) -> Vec<FlowFilter> {
        filter::selectable_filters(self.aggregator.lock().view())
    }

    /// The view narrowed by `predicate`. A filter naming an attack type that
    /// has left the view falls back to all flows.
    pub fn filtered(&self, predicate: &FlowFilter) -> Vec<FlowEvent> {
        self.aggregator.lock().filtered(predicate)
    }

    pub fn summary(&self) -> AttackSummary {
        self.aggregator.lock().summary()
    }

    pub fn history_error(&self) -> Option<String> {
        self.history.last_error()
    }

    /// Records requested per history load.
    pub fn history_limit(&self) -> u32 {
        self.history.limit()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let (stats, flows, attack_types, summary) = {
            let aggregator = self.aggregator.lock();
            (
                aggregator.stats(),
                aggregator.to_vec(),
                aggregator.attack_types(),
                aggregator.summary(),
            )
        };
        DashboardSnapshot {
            connection: self.connection_state(),
            monitoring: self.monitoring(),
            stats,
            flows,
            attack_types,
            summary,
            history_age_secs: self.history.since_last_success().map(|age| age.as_secs()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
