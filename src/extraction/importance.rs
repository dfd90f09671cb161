//! Importance normalization
//!
//! Numbers in [0, 1] are taken as-is (clamped). Numbers above 1 are read as
//! a 0–10 scale and divided by 10, capped at 1. Categorical labels map to
//! fixed values; anything else gets the caller's default.

use serde_json::Value;

pub const HIGH: f64 = 0.85;
pub const MEDIUM: f64 = 0.6;
pub const LOW: f64 = 0.35;

const HIGH_LABELS: &[&str] = &["high", "critical", "urgent", "major", "核心", "重要", "高"];
const LOW_LABELS: &[&str] = &["low", "minor", "trivial", "次要", "低"];
const MEDIUM_LABELS: &[&str] = &["medium", "moderate", "normal", "中"];

/// Normalize a numeric importance
pub fn normalize_number(value: f64, default: f64) -> f64 {
    if value.is_nan() {
        default
    } else if value <= 1.0 {
        value.clamp(0.0, 1.0)
    } else {
        (value / 10.0).min(1.0)
    }
}

/// Normalize a categorical (or numeric-as-text) importance
pub fn normalize_label(label: &str, default: f64) -> f64 {
    let lower = label.trim().to_lowercase();
    if let Ok(n) = lower.parse::<f64>() {
        return normalize_number(n, default);
    }
    if HIGH_LABELS.iter().any(|l| lower.contains(l)) {
        HIGH
    } else if LOW_LABELS.iter().any(|l| lower.contains(l)) {
        LOW
    } else if MEDIUM_LABELS.iter().any(|l| lower.contains(l)) {
        MEDIUM
    } else {
        default
    }
}

/// Normalize whatever the model put in an importance field
pub fn normalize_importance(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().map_or(default, |x| normalize_number(x, default)),
        Some(Value::String(s)) => normalize_label(s, default),
        _ => default,
    }
}
