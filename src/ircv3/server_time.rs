//! Server-time handling for the IRCv3 `server-time` capability.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp as an IRCv3 server-time string.
///
/// Always millisecond precision in UTC, like `2023-01-01T12:00:00.000Z`.
pub fn format_server_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a `time` tag value. Returns `None` for anything not RFC 3339.
pub fn parse_server_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The line's timestamp: the `time` tag when it parses, else `fallback`.
pub fn timestamp_or(time_tag: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    time_tag.and_then(parse_server_time).unwrap_or(fallback)
}
