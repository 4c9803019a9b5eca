use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::models::{FlowEvent, Severity, BENIGN_LABEL};
use crate::protocol::FlowRecord;

// ── TimestampProcessor ────────────────────────────────────────────────────────

/// Parses the timestamp strings the service emits.
///
/// The service writes naive UTC ISO-8601 strings (no offset); RFC 3339 with an
/// offset or a `Z` suffix is accepted as well.
pub struct TimestampProcessor;

impl TimestampProcessor {
    /// Parse `s` into a UTC [`DateTime`], or `None` when no format matches.
    pub fn parse_str(s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        let normalised = if let Some(stripped) = s.strip_suffix('Z') {
            format!("{}+00:00", stripped)
        } else {
            s.to_string()
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
            return Some(dt.with_timezone(&Utc));
        }

        const FORMATS: &[&str] = &[
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S",
        ];

        for fmt in FORMATS {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }

        warn!(timestamp = s, "could not parse flow timestamp");
        None
    }
}

// ── RecordProcessor ───────────────────────────────────────────────────────────

/// Maps lenient [`FlowRecord`]s onto the dashboard's [`FlowEvent`] shape.
pub struct RecordProcessor;

impl RecordProcessor {
    /// Confidence fallback chain: `confidence` → `binary_confidence` → `0`.
    ///
    /// Non-finite values are skipped and the result is clamped to `[0, 1]`.
    pub fn resolve_confidence(record: &FlowRecord) -> f64 {
        [record.confidence, record.binary_confidence]
            .into_iter()
            .flatten()
            .find(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }

    /// Timestamp fallback chain: `timestamp` → `created_at`.
    ///
    /// An unparseable `timestamp` falls through to `created_at`.
    pub fn resolve_timestamp(record: &FlowRecord) -> Option<DateTime<Utc>> {
        [record.timestamp.as_deref(), record.created_at.as_deref()]
            .into_iter()
            .flatten()
            .find_map(TimestampProcessor::parse_str)
    }

    /// Normalize a wire record.
    pub fn to_event(record: FlowRecord) -> FlowEvent {
        let confidence = Self::resolve_confidence(&record);
        let timestamp = Self::resolve_timestamp(&record);
        let attack_type = match record.attack_type {
            Some(t) if !t.trim().is_empty() => t,
            _ if record.is_attack => "Unknown".to_string(),
            _ => BENIGN_LABEL.to_string(),
        };

        FlowEvent {
            id: record.id,
            timestamp,
            src_ip: record.src_ip,
            src_port: record.src_port,
            dst_ip: record.dst_ip,
            dst_port: record.dst_port,
            protocol: record.protocol,
            is_attack: record.is_attack,
            attack_type,
            severity: record.severity.as_deref().map(Severity::parse),
            confidence,
        }
    }
}
