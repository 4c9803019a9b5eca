//! View filters.
//!
//! Filtering is a pure function over the view: it never reorders and never
//! mutates. The attack-type filters that make sense at any moment are derived
//! from the view itself.

use std::collections::BTreeSet;

use flowwatch_core::models::FlowEvent;

/// Predicate selecting a subsequence of the flow view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum FlowFilter {
    #[default]
    All,
    AttacksOnly,
    /// Flows whose `attack_type` equals the given label exactly.
    AttackType(String),
}

impl FlowFilter {
    /// Parse a user-facing filter name.
    ///
    /// `"all"` and `"attacks"` select the built-in filters; anything else is
    /// taken as an attack type label.
    pub fn parse(name: &str) -> Self {
        match name {
            "all" | "" => FlowFilter::All,
            "attacks" | "attacks-only" => FlowFilter::AttacksOnly,
            other => FlowFilter::AttackType(other.to_string()),
        }
    }

    pub fn matches(&self, event: &FlowEvent) -> bool {
        match self {
            FlowFilter::All => true,
            FlowFilter::AttacksOnly => event.is_attack,
            FlowFilter::AttackType(label) => event.attack_type == *label,
        }
    }

    /// Fall back to [`FlowFilter::All`] when an attack-type filter names a
    /// type that is no longer present in `available`.
    pub fn resolve(self, available: &[String]) -> Self {
        match self {
            FlowFilter::AttackType(label) if !available.contains(&label) => FlowFilter::All,
            other => other,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            FlowFilter::All => "all",
            FlowFilter::AttacksOnly => "attacks",
            FlowFilter::AttackType(label) => label.as_str(),
        }
    }
}

/// Return the events matching `predicate`, in their original order.
pub fn filter<'a, I>(view: I, predicate: &FlowFilter) -> Vec<&'a FlowEvent>
where
    I: IntoIterator<Item = &'a FlowEvent>,
{
    view.into_iter().filter(|e| predicate.matches(e)).collect()
}

/// Distinct attack types among the attack flows in `view`, sorted.
pub fn attack_types<'a, I>(view: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a FlowEvent>,
{
    view.into_iter()
        .filter(|e| e.is_attack)
        .map(|e| e.attack_type.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Every filter an operator can currently pick: the two built-ins followed by
/// one entry per attack type present in `view`.
pub fn selectable_filters<'a, I>(view: I) -> Vec<FlowFilter>
where
    I: IntoIterator<Item = &'a FlowEvent>,
{
    let mut filters = vec![FlowFilter::All, FlowFilter::AttacksOnly];
    filters.extend(attack_types(view).into_iter().map(FlowFilter::AttackType));
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(n: u16, is_attack: bool, attack_type: &str) -> FlowEvent {
        FlowEvent {
            id: None,
            timestamp: None,
            src_ip: "10.0.0.1".into(),
            src_port: n,
            dst_ip: "10.0.0.2".into(),
            dst_port: 80,
            protocol: None,
            is_attack,
            attack_type: attack_type.into(),
            severity: None,
            confidence: 0.0,
        }
    }

    fn sample() -> Vec<FlowEvent> {
        vec![
            ev(1, false, "BENIGN"),
            ev(2, true, "DDoS"),
            ev(3, false, "BENIGN"),
            ev(4, true, "Port Scan"),
            ev(5, true, "DDoS"),
        ]
    }

    #[test]
    fn test_filter_all_is_identity() {
        let view = sample();
        let out = filter(&view, &FlowFilter::All);
        assert_eq!(out.len(), 5);
        assert!(out.iter().zip(view.iter()).all(|(a, b)| *a == b));
    }

    #[test]
    fn test_filter_attacks_preserves_order() {
        let view = sample();
        let ports: Vec<u16> = filter(&view, &FlowFilter::AttacksOnly)
            .iter()
            .map(|e| e.src_port)
            .collect();
        assert_eq!(ports, vec![2, 4, 5]);
    }

    #[test]
    fn test_filter_exact_attack_type() {
        let view = sample();
        let ddos = filter(&view, &FlowFilter::AttackType("DDoS".into()));
        assert_eq!(ddos.len(), 2);
        assert!(filter(&view, &FlowFilter::AttackType("ddos".into())).is_empty());
    }

    #[test]
    fn test_attack_types_distinct_sorted_attacks_only() {
        let view = sample();
        assert_eq!(attack_types(&view), vec!["DDoS".to_string(), "Port Scan".to_string()]);
    }

    #[test]
    fn test_attack_types_ignore_benign_labels() {
        // A benign flow with an odd label must not become selectable.
        let view = vec![ev(1, false, "Bot")];
        assert!(attack_types(&view).is_empty());
    }

    #[test]
    fn test_selectable_filters() {
        let view = sample();
        let filters = selectable_filters(&view);
        assert_eq!(filters[0], FlowFilter::All);
        assert_eq!(filters[1], FlowFilter::AttacksOnly);
        assert_eq!(filters.len(), 4);
    }

    #[test]
    fn test_parse_and_label() {
        assert_eq!(FlowFilter::parse("all"), FlowFilter::All);
        assert_eq!(FlowFilter::parse("attacks"), FlowFilter::AttacksOnly);
        assert_eq!(
            FlowFilter::parse("Port Scan"),
            FlowFilter::AttackType("Port Scan".into())
        );
        assert_eq!(FlowFilter::AttacksOnly.label(), "attacks");
        assert_eq!(FlowFilter::AttackType("Bot".into()).label(), "Bot");
    }

    #[test]
    fn test_resolve_drops_vanished_type() {
        let available = vec!["DDoS".to_string()];
        assert_eq!(
            FlowFilter::AttackType("Bot".into()).resolve(&available),
            FlowFilter::All
        );
        assert_eq!(
            FlowFilter::AttackType("DDoS".into()).resolve(&available),
            FlowFilter::AttackType("DDoS".into())
        );
        assert_eq!(FlowFilter::AttacksOnly.resolve(&[]), FlowFilter::AttacksOnly);
    }
}
