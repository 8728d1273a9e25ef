//! Timestamp cell parsing.
//!
//! Plant exports write local wall-clock times without a zone designator
//! and are not consistent about separators or sub-second digits. All
//! accepted layouts are interpreted as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Accepted layouts, tried in order. `%.f` also matches an absent
/// fractional part.
const LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

/// Parse one timestamp cell, returning `None` when no layout matches.
pub fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    for layout in LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cell, layout) {
            return Some(naive.and_utc());
        }
    }
    // Date-only cells occur in daily summary exports.
    if let Ok(date) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}
