//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to fractional seconds (catalog APIs report seconds)
pub fn millis_to_seconds(millis: u64) -> f64 {
    millis as f64 / 1000.0
}

/// Timestamp as Unix milliseconds, the representation stored in SQLite
pub fn to_unix_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Inverse of [`to_unix_millis`]; out-of-range values clamp to the epoch
pub fn from_unix_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
