//! Timestamp and duration utilities

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Convert a configured number of seconds to a duration
///
/// Negative, NaN and infinite values collapse to zero; values too large for
/// a `Duration` saturate to `Duration::MAX`.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Format a timestamp for storage
///
/// Always nanosecond precision with a `Z` suffix, so the text is fixed-width
/// and sorts lexically in the same order as the instants it encodes.
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp written by [`to_db_timestamp`]
pub fn parse_db_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
