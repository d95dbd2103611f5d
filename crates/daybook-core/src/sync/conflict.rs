//! Last-writer-wins conflict resolution.
//!
//! Two pure comparators over RFC 3339 timestamps. Equal timestamps favor
//! neither side: the caller clears the dirty flag without touching fields,
//! so whichever side already holds the values wins and the pair converges
//! without oscillation.

use chrono::{DateTime, Utc};

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// True iff the remote timestamp parses and is strictly newer than the
/// local one, or the local one is unparseable.
pub fn remote_wins(local_ts: &str, remote_ts: &str) -> bool {
    match (parse_ts(local_ts), parse_ts(remote_ts)) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(local), Some(remote)) => remote > local,
    }
}

/// Mirror of [`remote_wins`]: true iff the local timestamp parses and is
/// strictly newer than the remote one, or the remote one is unparseable.
pub fn local_wins(local_ts: &str, remote_ts: &str) -> bool {
    match (parse_ts(local_ts), parse_ts(remote_ts)) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(local), Some(remote)) => local > remote,
    }
}
