use crate::models::{FlowEvent, Stats};

/// Format an integer count with thousands separators.
///
/// # Examples
///
/// ```
/// use flowwatch_core::formatting::format_count;
///
/// assert_eq!(format_count(0), "0");
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1_234_567), "1,234,567");
/// ```
pub fn format_count(value: u64) -> String {
    group_thousands(&value.to_string())
}

/// Calculate `(part / whole) * 100`, rounded to `decimal_places`.
///
/// Returns `0.0` if `whole` is zero to avoid division by zero.
///
/// # Examples
///
/// ```
/// use flowwatch_core::formatting::percentage;
///
/// assert!((percentage(50.0, 200.0, 1) - 25.0).abs() < 1e-9);
/// assert_eq!(percentage(0.0, 0.0, 2), 0.0);
/// ```
pub fn percentage(part: f64, whole: f64, decimal_places: u32) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    let raw = (part / whole) * 100.0;
    let factor = 10_f64.powi(decimal_places as i32);
    (raw * factor).round() / factor
}

/// Format a `[0, 1]` confidence as a percentage with one decimal.
///
/// # Examples
///
/// ```
/// use flowwatch_core::formatting::format_confidence;
///
/// assert_eq!(format_confidence(0.934), "93.4%");
/// assert_eq!(format_confidence(1.0), "100.0%");
/// ```
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

/// `ip:port`, bracketing IPv6 addresses.
pub fn format_endpoint(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

/// One-line rendering of a flow for log output.
///
/// `10:20:30 ATTACK  DDoS 10.0.0.1:1234 -> 10.0.0.2:80 TCP 93.4% high`
pub fn format_flow_line(event: &FlowEvent) -> String {
    let time = event
        .timestamp
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let verdict = if event.is_attack { "ATTACK" } else { "ok" };
    let mut line = format!(
        "{} {:<7} {} {} -> {} {} {}",
        time,
        verdict,
        event.attack_type,
        format_endpoint(&event.src_ip, event.src_port),
        format_endpoint(&event.dst_ip, event.dst_port),
        event.protocol.as_deref().unwrap_or("-"),
        format_confidence(event.confidence),
    );
    if let Some(severity) = &event.severity {
        line.push(' ');
        line.push_str(severity.as_str());
    }
    line
}

/// `"1,204 flows, 17 attacks (1.41%)"`
pub fn format_stats(stats: &Stats) -> String {
    format!(
        "{} flows, {} attacks ({}%)",
        format_count(stats.total),
        format_count(stats.attacks),
        percentage(stats.attacks as f64, stats.total as f64, 2)
    )
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(s: &str) -> String {
    if s.len() <= 3 {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let remainder = chars.len() % 3;
    for (i, &c) in chars.iter().enumerate() {
        if i != 0 && (i % 3 == remainder) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

// ── Tests ──────────────────────────────────────────────────────────────────────
