//! Timestamp utilities
//!
//! AOI exports carry naive wall-clock timestamps in a handful of layouts.
//! Everything stored in the database uses [`STORAGE_FORMAT`], which sorts
//! lexically in chronological order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Canonical text layout for timestamps in the database
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
];

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

/// Parse a timestamp cell from an export or from the database
///
/// Accepts RFC 3339, the layouts in `DATETIME_LAYOUTS`, and a bare
/// `YYYY-MM-DD` date (midnight). All results are station wall-clock time:
/// an RFC 3339 offset is dropped, not applied, so both notations of one
/// reading order identically.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }

    for layout in DATETIME_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(ts);
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Extract the export timestamp embedded in a file name
///
/// Recognizes `YYYY-MM-DD`, optionally followed by `T` or `_` and a compact
/// `HHMMSS` time, anywhere in the name. The AOI export tool names files like
/// `Defect RawData - 2025-07-26T151030.489.xlsx`.
pub fn embedded_timestamp(name: &str) -> Option<NaiveDateTime> {
    for (start, _) in name.char_indices() {
        let Some(candidate) = name.get(start..start + 10) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(candidate, "%Y-%m-%d") else {
            continue;
        };

        let time = name
            .get(start + 10..start + 17)
            .filter(|rest| rest.starts_with('T') || rest.starts_with('_'))
            .and_then(|rest| NaiveTime::parse_from_str(&rest[1..], "%H%M%S").ok());

        return match time {
            Some(time) => Some(date.and_time(time)),
            None => date.and_hms_opt(0, 0, 0),
        };
    }
    None
}
