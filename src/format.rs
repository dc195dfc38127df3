//! Human-readable rendering of market numbers

use chrono::{DateTime, Utc};

/// `$189.84`, or `$0.0123` for sub-dollar prices
pub fn price(value: f64) -> String {
    if value.abs() < 1.0 && value != 0.0 {
        format!("${:.4}", value)
    } else {
        format!("${:.2}", value)
    }
}

/// `+1.23` / `-0.40`
pub fn signed(value: f64) -> String {
    if value >= 0.0 {
        format!("+{:.2}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// `+0.65%` / `-2.10%`
pub fn percent(value: f64) -> String {
    format!("{}%", signed(value))
}

/// `2.95T`, `52.10M`, `9.4K`, `512`
pub fn compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e12 {
        format!("{:.2}T", value / 1e12)
    } else if abs >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}K", value / 1e3)
    } else {
        format!("{:.0}", value)
    }
}

/// `$2.95T`
pub fn money(value: f64) -> String {
    format!("${}", compact(value))
}

/// Relative age of a timestamp: `3h ago`, `2d ago`
pub fn age(published: &str, now: DateTime<Utc>) -> Option<String> {
    let at = DateTime::parse_from_rfc3339(published)
        .map(|t| t.with_timezone(&Utc))
        .ok()?;

    let minutes = (now - at).num_minutes().max(0);
    Some(if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 60 * 24 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / (60 * 24))
    })
}
