// display helpers shared by the summary, the chart axes and the exports

use std::collections::BTreeMap;

use chrono::Duration;

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Render labels for display as `k="v", k2="v2"`. Empty for no labels.
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<String>>()
        .join(", ")
}

/// Format a byte count with a 1024 base
pub fn format_bytes(raw: f64) -> String {
    if raw == 0.0 {
        return "0 B".to_string();
    }
    let exp = (raw.abs().ln() / 1024f64.ln()).floor().clamp(0.0, (BYTE_UNITS.len() - 1) as f64);
    format!("{:.2} {}", raw / 1024f64.powi(exp as i32), BYTE_UNITS[exp as usize])
}

/// Format a duration given in seconds
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.2} ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{:.2} s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.2} min", seconds / 60.0)
    } else {
        format!("{:.2} h", seconds / 3600.0)
    }
}

/// Pick a formatter for a metric value based on what the metric name says it measures
pub fn format_value(metric_name: &str, raw: f64) -> String {
    let lower = metric_name.to_lowercase();
    if lower.contains("bytes") || lower.contains("memory") {
        format_bytes(raw)
    } else if lower.contains("seconds") || lower.contains("duration") {
        format_duration(raw)
    } else if raw >= 1_000_000.0 {
        format!("{:.2}M", raw / 1_000_000.0)
    } else if raw >= 1000.0 {
        format!("{:.2}K", raw / 1000.0)
    } else {
        format!("{:.2}", raw)
    }
}

/// A coarse human span like `2d 3h` or `45s`: the largest non-zero unit, plus the next one down if set.
pub fn format_span(span: Duration) -> String {
    let units: [(&str, f64); 7] = [
        ("y", 365.25 * 24.0 * 60.0 * 60.0),
        ("mo", 30.44 * 24.0 * 60.0 * 60.0),
        ("w", 7.0 * 24.0 * 60.0 * 60.0),
        ("d", 24.0 * 60.0 * 60.0),
        ("h", 60.0 * 60.0),
        ("min", 60.0),
        ("s", 1.0),
    ];

    let mut remaining = span.num_seconds().max(0) as f64;
    let mut counts = [0u64; 7];
    for (idx, (_, size)) in units.iter().enumerate() {
        counts[idx] = (remaining / size).floor() as u64;
        remaining %= size;
    }

    match counts.iter().position(|c| *c > 0) {
        // the seconds slot is the last one, so there's never a "next" unit for it
        Some(idx) if idx + 1 < units.len() && counts[idx + 1] > 0 => format!(
            "{}{} {}{}",
            counts[idx],
            units[idx].0,
            counts[idx + 1],
            units[idx + 1].0
        ),
        Some(idx) => format!("{}{}", counts[idx], units[idx].0),
        None => "0s".to_string(),
    }
}
