//! Time utilities for server-stamped message timestamps.

use chrono::{SecondsFormat, Utc};

/// Current time as an RFC 3339 string with millisecond precision (UTC).
///
/// Chat messages and reactions carry this server-assigned stamp; clients
/// never supply their own.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
