use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::StatusReport;

/// Attack type reported by the classifier for benign traffic.
pub const BENIGN_LABEL: &str = "BENIGN";

/// Severity class the service attaches to each classified flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Benign traffic (`"none"` on the wire).
    #[serde(rename = "none")]
    Benign,
    Low,
    Medium,
    High,
    /// Any label this client does not recognise, kept verbatim.
    #[serde(untagged)]
    Unknown(String),
}

impl Severity {
    /// Parse a wire label, case-insensitively.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "none" => Severity::Benign,
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::Unknown(label.to_string()),
        }
    }

    /// Wire label for this severity.
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Benign => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Unknown(s) => s.as_str(),
        }
    }
}

/// A single classified flow as held by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Record identifier; only present for events loaded from history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// When the service classified the flow, if known.
    pub timestamp: Option<DateTime<Utc>>,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    /// Transport protocol (`"TCP"`, `"UDP"`, ...). Left unset when absent.
    pub protocol: Option<String>,
    /// Whether the binary classifier flagged this flow as an attack.
    pub is_attack: bool,
    /// Multiclass label, `"BENIGN"` for normal traffic.
    pub attack_type: String,
    /// Severity class. Left unset when absent.
    pub severity: Option<Severity>,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Running counters over the flows the dashboard has seen.
///
/// `attacks <= total` holds after every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: u64,
    pub attacks: u64,
}

impl Stats {
    /// Count one more flow.
    pub fn record(&mut self, is_attack: bool) {
        self.total += 1;
        if is_attack {
            self.attacks += 1;
        }
    }

    /// Recompute counters from scratch over `events`.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a FlowEvent>) -> Self {
        let mut stats = Stats::default();
        for event in events {
            stats.record(event.is_attack);
        }
        stats
    }

    pub fn benign(&self) -> u64 {
        self.total - self.attacks
    }
}

/// Lifecycle phase of the remote capture process, as believed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl Phase {
    pub fn is_running(self) -> bool {
        self == Phase::Running
    }

    /// `true` while a control operation is moving the service between states.
    pub fn is_transitional(self) -> bool {
        matches!(self, Phase::Starting | Phase::Stopping)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Stopped => "stopped",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Packet counters reported by the remote sniffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnifferStats {
    #[serde(default)]
    pub packet_count: u64,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// The orchestrator's current belief about the remote capture process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringState {
    pub phase: Phase,
    /// Interface the sniffer is bound to.
    pub interface: String,
    /// Interfaces the service host reports as available.
    pub available_interfaces: Vec<String>,
    /// Whether `interface` exists on the host; `None` when the host could not tell.
    pub interface_exists: Option<bool>,
    /// Flows currently being assembled by the service.
    pub active_flow_count: u64,
    pub sniffer_stats: SnifferStats,
    /// Message of the most recent failed control operation.
    pub last_error: Option<String>,
}

impl MonitoringState {
    /// Copy the descriptive fields of a status poll, leaving `phase` alone.
    pub fn absorb_status(&mut self, report: &StatusReport) {
        self.interface = report.interface.clone();
        self.available_interfaces = report.available_interfaces.clone();
        self.interface_exists = report.interface_exists;
        self.active_flow_count = report.active_flow_count;
        self.sniffer_stats = report.sniffer_stats.clone();
    }

    /// Build a state that mirrors a status poll exactly.
    pub fn from_status(report: &StatusReport) -> Self {
        let mut state = MonitoringState {
            phase: if report.running {
                Phase::Running
            } else {
                Phase::Stopped
            },
            ..Default::default()
        };
        state.absorb_status(report);
        state
    }
}

/// State of the push connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}
