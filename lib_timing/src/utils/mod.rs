//! # Utilities Module
//!
//! Small helpers shared across the ingestion path. The main customer is the
//! wire-format layer: timing providers ship lap and session times as clock
//! strings (`"00:01:02.500"`, `"01:02.500"`) and crossing timestamps as epoch
//! milliseconds; everything downstream works in `f64` seconds and
//! `chrono::DateTime<Utc>`.

use chrono::{DateTime, TimeZone, Utc};

/// Parses a provider clock string into seconds.
///
/// Accepted shapes: `HH:MM:SS`, `HH:MM:SS.fff`, `MM:SS.fff`, and a bare
/// seconds value. Returns `None` for anything that does not parse, so a bad
/// field can be skipped without aborting the record.
pub fn parse_clock(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut total = 0.0f64;
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    for part in &parts {
        let value: f64 = part.parse().ok()?;
        if value < 0.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

/// Converts a provider epoch-milliseconds value into a UTC timestamp.
pub fn epoch_millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
