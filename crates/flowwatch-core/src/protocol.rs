//! Wire contract of the remote classification service.
//!
//! These types mirror the JSON the service emits. They are deliberately
//! lenient: every field that the service may omit has a `serde` default, and
//! fields with alternate spellings across endpoints are kept side by side so
//! [`crate::data_processors::RecordProcessor`] can resolve them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::SnifferStats;

/// A classified flow as delivered by the push channel or the history query.
///
/// Push messages carry `timestamp` and `confidence`; history items carry
/// `id`, `created_at` and `binary_confidence` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub src_ip: String,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_ip: String,
    #[serde(default)]
    pub dst_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub is_attack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_confidence: Option<f64>,
}

/// Response of the status query (`GET /api/health/`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "sniffer_running", default)]
    pub running: bool,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub available_interfaces: Vec<String>,
    #[serde(default)]
    pub interface_exists: Option<bool>,
    #[serde(rename = "active_flows", default)]
    pub active_flow_count: u64,
    #[serde(default)]
    pub sniffer_stats: SnifferStats,
}

/// Outcome class of the start action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    AlreadyRunning,
    Warning,
    Failed,
    Unknown(String),
}

impl StartStatus {
    pub fn parse(label: &str) -> Self {
        match label {
            "started" => StartStatus::Started,
            "already_running" | "already-running" => StartStatus::AlreadyRunning,
            "warning" => StartStatus::Warning,
            "failed" => StartStatus::Failed,
            other => StartStatus::Unknown(other.to_string()),
        }
    }

    /// `true` when the service claims the sniffer is (now) running.
    pub fn claims_running(&self) -> bool {
        matches!(self, StartStatus::Started | StartStatus::AlreadyRunning)
    }
}

/// Response of the start action (`POST /api/health/sniffer/start`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StartResponse {
    pub fn start_status(&self) -> StartStatus {
        StartStatus::parse(&self.status)
    }
}

/// Acknowledgement returned by stop and set-interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Server-side aggregate over the service's own event store
/// (`GET /api/stats/`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    #[serde(default)]
    pub total_flows: u64,
    #[serde(default)]
    pub total_attacks: u64,
    /// Percentage, rounded to two decimals by the service.
    #[serde(default)]
    pub attack_ratio: f64,
    #[serde(default)]
    pub most_frequent_attack: Option<String>,
    #[serde(default)]
    pub attack_type_distribution: BTreeMap<String, u64>,
}

/// Body of an ad hoc classification request
/// (`POST /api/predictions/predict-flow`).
///
/// `features` holds any of the optional flow statistics (`flow_duration`,
/// `total_fwd_packets`, ...) in the service's snake_case naming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowInput {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,
    #[serde(flatten)]
    pub features: serde_json::Map<String, serde_json::Value>,
}

/// Result of an ad hoc classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub is_attack: bool,
    pub attack_type: String,
    pub binary_confidence: f64,
    #[serde(default)]
    pub class_probabilities: BTreeMap<String, f64>,
    pub severity: String,
}

/// Error body used by the service for non-success responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    /// Render `detail` as the message shown to the operator.
    ///
    /// String details pass through untouched; structured validation details
    /// are rendered as compact JSON.
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
