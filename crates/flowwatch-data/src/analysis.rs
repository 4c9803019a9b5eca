//! Attack breakdown over the current flow view.

use std::collections::BTreeMap;

use flowwatch_core::formatting::percentage;
use flowwatch_core::models::FlowEvent;
use serde::Serialize;

/// Derived figures for the dashboard's summary panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttackSummary {
    /// Flows considered.
    pub flows: u64,
    /// Attack flows among them.
    pub attacks: u64,
    /// `attacks / flows` as a percentage with two decimals.
    pub attack_ratio: f64,
    /// Attack flows per attack type.
    pub distribution: BTreeMap<String, u64>,
    /// The attack type with the highest count; ties go to the
    /// alphabetically first label.
    pub most_frequent: Option<String>,
}

impl AttackSummary {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a FlowEvent>) -> Self {
        let mut summary = AttackSummary::default();
        for event in events {
            summary.flows += 1;
            if event.is_attack {
                summary.attacks += 1;
                *summary
                    .distribution
                    .entry(event.attack_type.clone())
                    .or_default() += 1;
            }
        }

        summary.attack_ratio = percentage(summary.attacks as f64, summary.flows as f64, 2);

        // Label comparison is reversed so the alphabetically first label
        // wins a tie.
        summary.most_frequent = summary
            .distribution
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(label, _)| label.clone());

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(is_attack: bool, attack_type: &str) -> FlowEvent {
        FlowEvent {
            id: None,
            timestamp: None,
            src_ip: "a".into(),
            src_port: 1,
            dst_ip: "b".into(),
            dst_port: 2,
            protocol: None,
            is_attack,
            attack_type: attack_type.into(),
            severity: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_empty_view() {
        let summary = AttackSummary::from_events(&Vec::<FlowEvent>::new());
        assert_eq!(summary.flows, 0);
        assert_eq!(summary.attack_ratio, 0.0);
        assert!(summary.most_frequent.is_none());
        assert!(summary.distribution.is_empty());
    }

    #[test]
    fn test_distribution_and_ratio() {
        let events = vec![
            ev(true, "DDoS"),
            ev(true, "DDoS"),
            ev(true, "Bot"),
            ev(false, "BENIGN"),
        ];
        let summary = AttackSummary::from_events(&events);
        assert_eq!(summary.flows, 4);
        assert_eq!(summary.attacks, 3);
        assert_eq!(summary.attack_ratio, 75.0);
        assert_eq!(summary.distribution.get("DDoS"), Some(&2));
        assert_eq!(summary.distribution.get("Bot"), Some(&1));
        assert!(!summary.distribution.contains_key("BENIGN"));
        assert_eq!(summary.most_frequent.as_deref(), Some("DDoS"));
    }

    #[test]
    fn test_most_frequent_tie_breaks_alphabetically() {
        let events = vec![ev(true, "PortScan"), ev(true, "Bot")];
        let summary = AttackSummary::from_events(&events);
        assert_eq!(summary.most_frequent.as_deref(), Some("Bot"));
    }
}
