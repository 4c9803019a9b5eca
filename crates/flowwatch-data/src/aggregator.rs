//! Bounded flow view fed by pushed events and history snapshots.
//!
//! Two inputs arrive independently: single pushed records from the live
//! channel and bulk history snapshots fetched on demand. Pushes prepend and
//! count; a snapshot replaces everything it describes, view and counters
//! alike. Whichever snapshot completes last wins over push-derived state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use flowwatch_core::data_processors::RecordProcessor;
use flowwatch_core::models::{FlowEvent, Stats};
use flowwatch_core::protocol::FlowRecord;

use crate::analysis::AttackSummary;
use crate::filter::{self, FlowFilter};

/// Maximum number of flows kept in the view.
pub const FLOW_VIEW_CAPACITY: usize = 200;

// ── FlowAggregator ────────────────────────────────────────────────────────────

/// Most-recent-first window of flows plus running counters.
#[derive(Debug, Clone)]
pub struct FlowAggregator {
    view: VecDeque<FlowEvent>,
    stats: Stats,
    capacity: usize,
}

impl FlowAggregator {
    pub fn new() -> Self {
        Self::with_capacity(FLOW_VIEW_CAPACITY)
    }

    /// Aggregator with a custom view bound (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            view: VecDeque::with_capacity(capacity),
            stats: Stats::default(),
            capacity,
        }
    }

    // ── Inputs ────────────────────────────────────────────────────────────

    /// Apply one pushed record, stamping it with the current time if the
    /// record carries no usable timestamp.
    pub fn apply_push(&mut self, record: FlowRecord) -> &FlowEvent {
        self.apply_push_at(record, Utc::now())
    }

    /// Apply one pushed record received at `received_at`.
    ///
    /// The event goes to the front of the view, the view is truncated to its
    /// bound, and the counters are incremented.
    pub fn apply_push_at(&mut self, record: FlowRecord, received_at: DateTime<Utc>) -> &FlowEvent {
        let mut event = RecordProcessor::to_event(record);
        event.timestamp.get_or_insert(received_at);

        self.stats.record(event.is_attack);
        self.view.push_front(event);
        self.view.truncate(self.capacity);

        tracing::trace!(
            total = self.stats.total,
            attacks = self.stats.attacks,
            "pushed flow applied"
        );

        &self.view[0]
    }

    /// Replace the view and the counters with a history snapshot.
    ///
    /// Counters cover every record in the snapshot, including those that do
    /// not fit in the view. The view is sorted newest first (stable, records
    /// without a timestamp last) and truncated to its bound.
    pub fn apply_snapshot(&mut self, records: Vec<FlowRecord>) {
        let mut events: Vec<FlowEvent> = records.into_iter().map(RecordProcessor::to_event).collect();

        self.stats = Stats::from_events(&events);

        // `None < Some(_)`, so comparing b to a sorts newest first and
        // leaves undated records at the end.
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(self.capacity);
        self.view = events.into();

        tracing::debug!(
            total = self.stats.total,
            attacks = self.stats.attacks,
            kept = self.view.len(),
            "history snapshot applied"
        );
    }

    // ── Outputs ───────────────────────────────────────────────────────────

    /// The view, most recent first.
    pub fn view(&self) -> &VecDeque<FlowEvent> {
        &self.view
    }

    /// Owned copy of the view, most recent first.
    pub fn to_vec(&self) -> Vec<FlowEvent> {
        self.view.iter().cloned().collect()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attack types currently selectable as filters.
    pub fn attack_types(&self) -> Vec<String> {
        filter::attack_types(&self.view)
    }

    /// Owned copy of the flows matching `predicate`.
    ///
    /// An attack-type filter naming a type that has left the view falls back
    /// to showing everything.
    pub fn filtered(&self, predicate: &FlowFilter) -> Vec<FlowEvent> {
        let effective = predicate.clone().resolve(&self.attack_types());
        filter::filter(&self.view, &effective)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> AttackSummary {
        AttackSummary::from_events(&self.view)
    }
}

impl Default for FlowAggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn push_record(n: u16, is_attack: bool, attack_type: &str) -> FlowRecord {
        FlowRecord {
            src_ip: "192.168.0.10".into(),
            src_port: n,
            dst_ip: "192.168.0.1".into(),
            dst_port: 443,
            protocol: Some("TCP".into()),
            is_attack,
            attack_type: Some(attack_type.into()),
            confidence: Some(0.75),
            ..Default::default()
        }
    }

    fn history_record(id: u64, minute: u32, is_attack: bool) -> FlowRecord {
        FlowRecord {
            id: Some(id),
            created_at: Some(format!("2024-05-01T10:{:02}:00", minute)),
            src_ip: "10.0.0.1".into(),
            src_port: 1000 + id as u16,
            dst_ip: "10.0.0.2".into(),
            dst_port: 80,
            is_attack,
            attack_type: Some(if is_attack { "DDoS" } else { "BENIGN" }.into()),
            binary_confidence: Some(0.4),
            ..Default::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    // ── apply_push ────────────────────────────────────────────────────────

    #[test]
    fn test_push_prepends_and_counts() {
        let mut agg = FlowAggregator::new();
        agg.apply_push_at(push_record(1, false, "BENIGN"), t0());
        agg.apply_push_at(push_record(2, true, "DDoS"), t0());

        assert_eq!(agg.len(), 2);
        assert_eq!(agg.view()[0].src_port, 2);
        assert_eq!(agg.view()[1].src_port, 1);
        assert_eq!(agg.stats(), Stats { total: 2, attacks: 1 });
    }

    #[test]
    fn test_push_stamps_missing_timestamp() {
        let mut agg = FlowAggregator::new();
        let event = agg.apply_push_at(push_record(1, false, "BENIGN"), t0());
        assert_eq!(event.timestamp, Some(t0()));
    }

    #[test]
    fn test_push_keeps_own_timestamp() {
        let mut agg = FlowAggregator::new();
        let record = FlowRecord {
            timestamp: Some("2024-01-01T00:00:00".into()),
            ..push_record(1, false, "BENIGN")
        };
        let event = agg.apply_push_at(record, t0());
        assert_eq!(event.timestamp, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_push_normalizes_confidence() {
        let mut agg = FlowAggregator::new();
        let record = FlowRecord {
            confidence: None,
            binary_confidence: Some(0.25),
            ..push_record(1, true, "Bot")
        };
        assert_eq!(agg.apply_push_at(record, t0()).confidence, 0.25);

        let record = FlowRecord {
            confidence: None,
            ..push_record(2, true, "Bot")
        };
        assert_eq!(agg.apply_push_at(record, t0()).confidence, 0.0);
    }

    #[test]
    fn test_push_bounded_to_last_200_in_reverse_arrival() {
        let mut agg = FlowAggregator::new();
        let n: u16 = 537;
        for i in 0..n {
            agg.apply_push_at(push_record(i, i % 7 == 0, "DDoS"), t0());
        }

        assert_eq!(agg.len(), FLOW_VIEW_CAPACITY);
        let ports: Vec<u16> = agg.view().iter().map(|e| e.src_port).collect();
        let expected: Vec<u16> = (n - 200..n).rev().collect();
        assert_eq!(ports, expected);

        // Counters keep counting past the view bound.
        assert_eq!(agg.stats().total, n as u64);
        assert_eq!(agg.stats().attacks, (0..n).filter(|i| i % 7 == 0).count() as u64);
    }

    #[test]
    fn test_attacks_never_exceed_total() {
        let mut agg = FlowAggregator::new();
        for i in 0..50u16 {
            agg.apply_push_at(push_record(i, i % 2 == 0, "DDoS"), t0());
            assert!(agg.stats().attacks <= agg.stats().total);
        }
        agg.apply_snapshot(vec![history_record(1, 1, true), history_record(2, 2, true)]);
        assert!(agg.stats().attacks <= agg.stats().total);
    }

    // ── apply_snapshot ────────────────────────────────────────────────────

    #[test]
    fn test_snapshot_replaces_push_state() {
        let mut agg = FlowAggregator::new();
        for i in 0..10u16 {
            agg.apply_push_at(push_record(i, true, "Bot"), t0());
        }

        agg.apply_snapshot(vec![
            history_record(1, 5, false),
            history_record(2, 4, true),
            history_record(3, 3, false),
        ]);

        assert_eq!(agg.len(), 3);
        assert_eq!(agg.stats(), Stats { total: 3, attacks: 1 });
        assert!(agg.view().iter().all(|e| e.id.is_some()));
        assert_eq!(agg.attack_types(), vec!["DDoS".to_string()]);
    }

    #[test]
    fn test_snapshot_sorted_newest_first() {
        let mut agg = FlowAggregator::new();
        agg.apply_snapshot(vec![
            history_record(1, 3, false),
            history_record(2, 9, false),
            history_record(3, 1, false),
        ]);
        let ids: Vec<u64> = agg.view().iter().filter_map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_snapshot_undated_records_last() {
        let mut agg = FlowAggregator::new();
        let undated = FlowRecord {
            created_at: None,
            ..history_record(7, 0, false)
        };
        agg.apply_snapshot(vec![undated, history_record(1, 1, false)]);
        assert_eq!(agg.view()[0].id, Some(1));
        assert_eq!(agg.view()[1].id, Some(7));
        assert!(agg.view()[1].timestamp.is_none());
    }

    #[test]
    fn test_snapshot_counts_beyond_view_bound() {
        let mut agg = FlowAggregator::new();
        let records: Vec<FlowRecord> = (0..1000u64)
            .map(|i| history_record(i, (i % 60) as u32, i < 10))
            .collect();
        agg.apply_snapshot(records);

        assert_eq!(agg.len(), FLOW_VIEW_CAPACITY);
        assert_eq!(agg.stats(), Stats { total: 1000, attacks: 10 });
    }

    #[test]
    fn test_snapshot_maps_alternate_field_names() {
        let mut agg = FlowAggregator::new();
        agg.apply_snapshot(vec![history_record(1, 30, true)]);
        let event = &agg.view()[0];
        assert_eq!(event.confidence, 0.4);
        assert_eq!(
            event.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_snapshot_idempotent() {
        let records = vec![
            history_record(1, 10, true),
            history_record(2, 10, false),
            history_record(3, 12, false),
            FlowRecord {
                created_at: None,
                ..history_record(4, 0, true)
            },
        ];

        let mut agg = FlowAggregator::new();
        agg.apply_snapshot(records.clone());
        let first_view = agg.to_vec();
        let first_stats = agg.stats();

        agg.apply_snapshot(records);
        assert_eq!(agg.to_vec(), first_view);
        assert_eq!(agg.stats(), first_stats);
    }

    #[test]
    fn test_empty_snapshot_resets() {
        let mut agg = FlowAggregator::new();
        agg.apply_push_at(push_record(1, true, "Bot"), t0());
        agg.apply_snapshot(Vec::new());
        assert!(agg.is_empty());
        assert_eq!(agg.stats(), Stats::default());
    }

    // ── filtering ─────────────────────────────────────────────────────────

    #[test]
    fn test_port_scan_scenario() {
        let mut agg = FlowAggregator::new();
        agg.apply_push_at(push_record(1, false, "BENIGN"), t0());
        agg.apply_push_at(push_record(2, false, "BENIGN"), t0());
        agg.apply_push_at(push_record(3, false, "BENIGN"), t0());
        agg.apply_push_at(push_record(4, true, "Port Scan"), t0());
        agg.apply_push_at(push_record(5, false, "BENIGN"), t0());

        assert_eq!(agg.stats(), Stats { total: 5, attacks: 1 });
        let order: Vec<u16> = agg.view().iter().map(|e| e.src_port).collect();
        assert_eq!(order, vec![5, 4, 3, 2, 1]);

        let scans = agg.filtered(&FlowFilter::parse("Port Scan"));
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].src_port, 4);
        assert_eq!(agg.attack_types(), vec!["Port Scan".to_string()]);
    }

    #[test]
    fn test_filtered_vanished_type_shows_all() {
        let mut agg = FlowAggregator::new();
        agg.apply_push_at(push_record(1, false, "BENIGN"), t0());
        let out = agg.filtered(&FlowFilter::AttackType("Bot".into()));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_summary_over_view() {
        let mut agg = FlowAggregator::new();
        agg.apply_push_at(push_record(1, true, "DDoS"), t0());
        agg.apply_push_at(push_record(2, false, "BENIGN"), t0());
        let summary = agg.summary();
        assert_eq!(summary.flows, 2);
        assert_eq!(summary.attack_ratio, 50.0);
        assert_eq!(summary.most_frequent.as_deref(), Some("DDoS"));
    }

    #[test]
    fn test_custom_capacity() {
        let mut agg = FlowAggregator::with_capacity(3);
        for i in 0..5u16 {
            agg.apply_push_at(push_record(i, false, "BENIGN"), t0());
        }
        assert_eq!(agg.len(), 3);
        assert_eq!(agg.capacity(), 3);
        assert_eq!(FlowAggregator::with_capacity(0).capacity(), 1);
    }
}
