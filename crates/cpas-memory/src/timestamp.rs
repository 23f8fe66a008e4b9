//! UTC timestamp normalization and the stored ISO-8601 form.
//!
//! Stored timestamps are fixed-width RFC 3339 strings in UTC with
//! nanosecond precision and a `Z` suffix, so lexicographic order on the
//! column equals chronological order. That only holds for four-digit
//! years, so instants outside [`MIN_YEAR`]..=[`MAX_YEAR`] are not storable.

use chrono::{DateTime, Datelike, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use tracing::warn;

/// A caller-supplied point in time, with or without zone information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// Zone-aware instant, already converted to UTC.
    Utc(DateTime<Utc>),
    /// Wall-clock time without a zone; interpreted as UTC.
    Naive(NaiveDateTime),
}

impl EventTime {
    /// Normalize to UTC. Naive values are taken as UTC, never rejected.
    pub fn to_utc(self) -> DateTime<Utc> {
        match self {
            Self::Utc(ts) => ts,
            Self::Naive(naive) => {
                warn!(timestamp = %naive, "naive timestamp supplied, assuming UTC");
                naive.and_utc()
            }
        }
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for EventTime {
    fn from(ts: DateTime<Tz>) -> Self {
        Self::Utc(ts.with_timezone(&Utc))
    }
}

impl From<NaiveDateTime> for EventTime {
    fn from(naive: NaiveDateTime) -> Self {
        Self::Naive(naive)
    }
}

/// First year with a fixed-width stored form.
pub const MIN_YEAR: i32 = 0;
/// Last year with a fixed-width stored form.
pub const MAX_YEAR: i32 = 9999;

/// Whether `ts` renders to the fixed-width stored form.
pub fn is_storable(ts: &DateTime<Utc>) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&ts.year())
}

/// Render a UTC instant in the stored form.
pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Current time in the stored form.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

/// Parse a stored timestamp. Accepts any RFC 3339 offset, not only `Z`.
pub fn parse_iso(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

// ── tests ────────────────────────────────────────────────────────────
