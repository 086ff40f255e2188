//! Run, item and modification timestamps.
//!
//! Every timestamp the engine stores or compares is UTC with whole-second
//! precision. Sub-second parts are dropped at the boundary so that two
//! readings of the same file can never differ only by nanoseconds.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use std::time::SystemTime;

pub type Timestamp = DateTime<Utc>;

/// Current time, truncated to the second.
pub fn now() -> Timestamp {
    truncate(Utc::now())
}

pub fn truncate(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(0)
}

pub fn from_system_time(time: SystemTime) -> Timestamp {
    truncate(DateTime::<Utc>::from(time))
}

pub fn from_unix(secs: i64) -> Option<Timestamp> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Parses an RFC 3339 value and normalizes it to UTC seconds.
pub fn parse(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| truncate(dt.with_timezone(&Utc)))
}

pub fn format(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
