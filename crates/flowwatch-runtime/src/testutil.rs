//! Scripted stand-ins for the service, shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flowwatch_core::error::{FlowwatchError, Result};
use flowwatch_core::protocol::{
    Ack, FlowInput, FlowRecord, PredictionResponse, ServerStats, StartResponse, StatusReport,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::api::ControlApi;
use crate::channel::{Connector, Transport};

/// A push message for a benign flow from `src_ip`.
pub(crate) fn flow_json(src_ip: &str) -> String {
    serde_json::json!({
        "timestamp": "2024-05-01T12:00:00Z",
        "src_ip": src_ip,
        "src_port": 40000,
        "dst_ip": "10.0.0.1",
        "dst_port": 443,
        "protocol": "TCP",
        "is_attack": false,
        "attack_type": "BENIGN",
        "confidence": 0.97
    })
    .to_string()
}

pub(crate) fn record(src_ip: &str, is_attack: bool, attack_type: &str, timestamp: &str) -> FlowRecord {
    FlowRecord {
        timestamp: Some(timestamp.to_string()),
        src_ip: src_ip.to_string(),
        src_port: 1234,
        dst_ip: "10.0.0.1".to_string(),
        dst_port: 80,
        protocol: Some("TCP".to_string()),
        is_attack,
        attack_type: Some(attack_type.to_string()),
        confidence: Some(0.9),
        ..Default::default()
    }
}

// ── Push connection ───────────────────────────────────────────────────────────

enum Script {
    Link(mpsc::UnboundedReceiver<Result<String>>),
    Failure,
}

/// [`Connector`] that hands out pre-scripted connections in order. Once the
/// script is exhausted every attempt fails.
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a successful connection. Messages sent on the returned sender
    /// arrive on it; dropping the sender closes it from the peer side.
    pub(crate) fn push_link(&self) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().push_back(Script::Link(rx));
        tx
    }

    pub(crate) fn push_failure(&self) {
        self.script.lock().push_back(Script::Failure);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Connections closed from our side.
    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct ScriptedTransport {
    rx: mpsc::UnboundedReceiver<Result<String>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(Script::Link(rx)) => Ok(Box::new(ScriptedTransport {
                rx,
                closes: Arc::clone(&self.closes),
            })),
            Some(Script::Failure) | None => {
                Err(FlowwatchError::Transport("connection refused".into()))
            }
        }
    }
}

// ── Control API ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Status,
    Start,
    Stop,
    SetInterface(String),
    History(u32),
    ServerStats,
    Predict,
}

/// In-memory model of the service.
///
/// Unscripted calls behave like a healthy service: start and stop flip the
/// sniffer, set-interface rebinds it, status reports the current truth.
/// Scripted responses are consumed first and leave the modelled sniffer
/// untouched.
pub(crate) struct MockControlApi {
    pub(crate) remote: Mutex<StatusReport>,
    calls: Mutex<Vec<Call>>,
    status_script: Mutex<VecDeque<Result<StatusReport>>>,
    start_script: Mutex<VecDeque<Result<StartResponse>>>,
    stop_script: Mutex<VecDeque<Result<Ack>>>,
    interface_script: Mutex<VecDeque<Result<Ack>>>,
    history_script: Mutex<VecDeque<Result<Vec<FlowRecord>>>>,
    history: Mutex<Vec<FlowRecord>>,
    start_gate: Mutex<Option<Arc<Notify>>>,
    status_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockControlApi {
    pub(crate) fn new(interface: &str, running: bool) -> Self {
        Self {
            remote: Mutex::new(StatusReport {
                running,
                interface: interface.to_string(),
                available_interfaces: vec!["lo".into(), "eth0".into(), "wlan0".into()],
                interface_exists: Some(true),
                ..Default::default()
            }),
            calls: Mutex::new(Vec::new()),
            status_script: Mutex::new(VecDeque::new()),
            start_script: Mutex::new(VecDeque::new()),
            stop_script: Mutex::new(VecDeque::new()),
            interface_script: Mutex::new(VecDeque::new()),
            history_script: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            start_gate: Mutex::new(None),
            status_gate: Mutex::new(None),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.remote.lock().running = running;
    }

    pub(crate) fn set_history(&self, records: Vec<FlowRecord>) {
        *self.history.lock() = records;
    }

    pub(crate) fn script_status(&self, result: Result<StatusReport>) {
        self.status_script.lock().push_back(result);
    }

    pub(crate) fn script_start(&self, result: Result<StartResponse>) {
        self.start_script.lock().push_back(result);
    }

    pub(crate) fn script_stop(&self, result: Result<Ack>) {
        self.stop_script.lock().push_back(result);
    }

    pub(crate) fn script_interface(&self, result: Result<Ack>) {
        self.interface_script.lock().push_back(result);
    }

    pub(crate) fn script_history(&self, result: Result<Vec<FlowRecord>>) {
        self.history_script.lock().push_back(result);
    }

    /// Make the next start calls wait until the returned gate is notified.
    pub(crate) fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Make the next status calls wait until the returned gate is notified.
    pub(crate) fn gate_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

pub(crate) fn rejected(message: &str) -> FlowwatchError {
    FlowwatchError::Rejected {
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait]
impl ControlApi for MockControlApi {
    async fn status(&self) -> Result<StatusReport> {
        self.record(Call::Status);
        let gate = self.status_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.status_script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.remote.lock().clone()),
        }
    }

    async fn start(&self) -> Result<StartResponse> {
        self.record(Call::Start);
        let gate = self.start_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.start_script.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        let mut remote = self.remote.lock();
        let status = if remote.running {
            "already_running"
        } else {
            "started"
        };
        remote.running = true;
        Ok(StartResponse {
            status: status.to_string(),
            message: Some(format!("Sniffer started on {}", remote.interface)),
        })
    }

    async fn stop(&self) -> Result<Ack> {
        self.record(Call::Stop);
        let scripted = self.stop_script.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        self.remote.lock().running = false;
        Ok(Ack {
            status: Some("stopped".into()),
            message: Some("Sniffer stopped".into()),
        })
    }

    async fn set_interface(&self, name: &str) -> Result<Ack> {
        self.record(Call::SetInterface(name.to_string()));
        let scripted = self.interface_script.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        self.remote.lock().interface = name.to_string();
        Ok(Ack {
            status: Some("updated".into()),
            message: Some(format!("Interface changed to {name}")),
        })
    }

    async fn history(&self, limit: u32) -> Result<Vec<FlowRecord>> {
        self.record(Call::History(limit));
        let scripted = self.history_script.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        Ok(self
            .history
            .lock()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn server_stats(&self) -> Result<ServerStats> {
        self.record(Call::ServerStats);
        let history = self.history.lock();
        let total_attacks = history.iter().filter(|r| r.is_attack).count() as u64;
        Ok(ServerStats {
            total_flows: history.len() as u64,
            total_attacks,
            ..Default::default()
        })
    }

    async fn predict_flow(&self, input: &FlowInput) -> Result<PredictionResponse> {
        self.record(Call::Predict);
        if input.src_ip.is_empty() {
            return Err(rejected("src_ip: field required"));
        }
        Ok(PredictionResponse {
            is_attack: false,
            attack_type: "BENIGN".into(),
            binary_confidence: 0.05,
            severity: "none".into(),
            ..Default::default()
        })
    }
}
