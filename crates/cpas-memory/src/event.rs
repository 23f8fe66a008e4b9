//! Append-only event log over the `events` table.
//!
//! Events are immutable: there is no update or delete path. `id` follows
//! insertion order; `timestamp` is caller-controlled and drives query
//! ordering, with `id` breaking ties.

use chrono::{DateTime, Datelike, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params_from_iter};
use serde::Serialize;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::payload::{self, Payload, StoredPayload};
use crate::timestamp::{self, EventTime};

/// Event type for user input recorded by an agent front end.
pub const USER_INPUT: &str = "USER_INPUT";
/// Event type for an agent's reply to a query.
pub const AGENT_RESPONSE: &str = "AGENT_RESPONSE";
/// Event type for an action taken by an agent.
pub const AGENT_ACTION: &str = "AGENT_ACTION";
/// Event type for a failure while serving a query.
pub const ERROR: &str = "ERROR";
/// Event type for lifecycle and status notices.
pub const SYSTEM_STATUS: &str = "SYSTEM_STATUS";

/// A logged event as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    /// Unix epoch when the stored text could not be parsed; see
    /// [`Self::unparsed_timestamp`].
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub source: String,
    /// `None` when the event was logged without a payload.
    pub details: Option<StoredPayload>,
    pub correlation_id: Option<String>,
    /// Raw `timestamp_iso` text of a row written by another producer in a
    /// form that does not parse.
    pub unparsed_timestamp: Option<String>,
}

impl Event {
    /// Decoded details, if present and decodable.
    pub fn details_value(&self) -> Option<&Payload> {
        self.details.as_ref().and_then(StoredPayload::value)
    }

    /// The timestamp as stored: the raw text for unparseable rows.
    pub fn stored_timestamp(&self) -> String {
        match &self.unparsed_timestamp {
            Some(raw) => raw.clone(),
            None => timestamp::to_iso(self.timestamp),
        }
    }
}

/// An event to be logged.
///
/// Detail serialization is deferred: a payload that cannot be encoded is
/// reported by [`crate::StructuredStore::log_event`], before any row is written.
#[derive(Debug)]
pub struct NewEvent {
    event_type: String,
    source: String,
    details: Option<StoreResult<Payload>>,
    correlation_id: Option<String>,
    timestamp: Option<EventTime>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            details: None,
            correlation_id: None,
            timestamp: None,
        }
    }

    /// Attach a structured payload.
    pub fn details<T>(mut self, details: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        self.details = Some(payload::to_payload(details));
        self
    }

    /// Attach an already-built payload.
    pub fn payload(mut self, details: Payload) -> Self {
        self.details = Some(Ok(details));
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Override the event time. Defaults to now; naive times are UTC.
    pub fn timestamp(mut self, timestamp: impl Into<EventTime>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Validate and encode into a row ready for insertion.
    pub(crate) fn into_row(self) -> StoreResult<EventRow> {
        if self.event_type.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "event_type must not be empty".into(),
            ));
        }
        if self.source.trim().is_empty() {
            return Err(StoreError::InvalidArgument("source must not be empty".into()));
        }

        let details_json = match self.details {
            Some(details) => Some(payload::encode(&details?)?),
            None => None,
        };
        let timestamp = self
            .timestamp
            .map(EventTime::to_utc)
            .unwrap_or_else(Utc::now);
        if !timestamp::is_storable(&timestamp) {
            return Err(StoreError::InvalidArgument(format!(
                "timestamp year {} is outside {}..={}",
                timestamp.year(),
                timestamp::MIN_YEAR,
                timestamp::MAX_YEAR
            )));
        }

        Ok(EventRow {
            timestamp_iso: timestamp::to_iso(timestamp),
            event_type: self.event_type,
            source: self.source,
            details_json,
            correlation_id: self.correlation_id,
        })
    }
}

/// Encoded event, one-to-one with the `events` columns.
#[derive(Debug)]
pub(crate) struct EventRow {
    pub timestamp_iso: String,
    pub event_type: String,
    pub source: String,
    pub details_json: Option<String>,
    pub correlation_id: Option<String>,
}

/// Result ordering for [`EventQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Most recent first.
    #[default]
    Descending,
    /// Oldest first.
    Ascending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Descending => "DESC",
            Self::Ascending => "ASC",
        }
    }
}

/// Filters for reading events. All set filters combine with AND.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub order: SortOrder,
}

impl EventQuery {
    /// Match every event, newest first.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn since(mut self, since: impl Into<EventTime>) -> Self {
        self.since = Some(since.into().to_utc());
        self
    }

    pub fn until(mut self, until: impl Into<EventTime>) -> Self {
        self.until = Some(until.into().to_utc());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::Ascending;
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// True when the time bounds rule out every storable timestamp.
    fn excludes_everything(&self) -> bool {
        self.since.is_some_and(|since| since.year() > timestamp::MAX_YEAR)
            || self.until.is_some_and(|until| until.year() < timestamp::MIN_YEAR)
    }

    /// `WHERE` clause and bound parameters. Values are never spliced into SQL.
    ///
    /// Bounds outside the storable years cannot narrow the result and are
    /// left out, since their text form would not compare chronologically.
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut conditions: Vec<&'static str> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(event_type) = &self.event_type {
            conditions.push("event_type = ?");
            params.push(SqlValue::Text(event_type.clone()));
        }
        if let Some(source) = &self.source {
            conditions.push("source = ?");
            params.push(SqlValue::Text(source.clone()));
        }
        if let Some(correlation_id) = &self.correlation_id {
            conditions.push("correlation_id = ?");
            params.push(SqlValue::Text(correlation_id.clone()));
        }
        if let Some(since) = self.since.filter(timestamp::is_storable) {
            conditions.push("timestamp_iso >= ?");
            params.push(SqlValue::Text(timestamp::to_iso(since)));
        }
        if let Some(until) = self.until.filter(timestamp::is_storable) {
            conditions.push("timestamp_iso <= ?");
            params.push(SqlValue::Text(timestamp::to_iso(until)));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

// ── SQL ──────────────────────────────────────────────────────────────

pub(crate) fn insert(conn: &Connection, row: &EventRow) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO events (timestamp_iso, event_type, source, details_json, correlation_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            row.timestamp_iso,
            row.event_type,
            row.source,
            row.details_json,
            row.correlation_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn query(conn: &Connection, query: &EventQuery) -> StoreResult<Vec<Event>> {
    if query.limit == Some(0) || query.excludes_everything() {
        return Ok(Vec::new());
    }

    let (where_clause, mut params) = query.where_clause();
    let order = query.order.sql();
    let mut sql = format!(
        "SELECT id, timestamp_iso, event_type, source, details_json, correlation_id \
         FROM events{where_clause} ORDER BY timestamp_iso {order}, id {order}"
    );
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params_from_iter(params), row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

pub(crate) fn count(conn: &Connection, query: &EventQuery) -> StoreResult<u64> {
    if query.excludes_everything() {
        return Ok(0);
    }
    let (where_clause, params) = query.where_clause();
    let sql = format!("SELECT count(*) FROM events{where_clause}");
    let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let id: i64 = row.get(0)?;
    let timestamp_raw: String = row.get(1)?;
    let (timestamp, unparsed_timestamp) = match timestamp::parse_iso(&timestamp_raw) {
        Ok(ts) => (ts, None),
        Err(err) => {
            warn!(id, raw = %timestamp_raw, error = %err, "unparseable event timestamp");
            (DateTime::<Utc>::default(), Some(timestamp_raw))
        }
    };
    let details = row
        .get::<_, Option<String>>(4)?
        .map(|raw| payload::decode_lenient(raw, &format!("event {id}")));

    Ok(Event {
        id,
        timestamp,
        event_type: row.get(2)?,
        source: row.get(3)?,
        details,
        correlation_id: row.get(5)?,
        unparsed_timestamp,
    })
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::migration;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migration::run_all(&conn).unwrap();
        conn
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn log(conn: &Connection, event: NewEvent) -> i64 {
        insert(conn, &event.into_row().unwrap()).unwrap()
    }

    #[test]
    fn blank_type_or_source_is_rejected() {
        let err = NewEvent::new("  ", "Console").into_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = NewEvent::new("USER_INPUT", "").into_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unserializable_details_fail_before_insert() {
        let mut bad = std::collections::BTreeMap::new();
        bad.insert(vec![1u8], "non-string key");
        let err = NewEvent::new("X", "Y").details(&bad).into_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailure);
    }

    #[test]
    fn non_finite_details_are_rejected() {
        let err = NewEvent::new("X", "Y")
            .details(&vec![f64::INFINITY])
            .into_row()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailure);
    }

    #[test]
    fn timestamps_outside_four_digit_years_are_rejected() {
        let far = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).unwrap();
        let err = NewEvent::new("A", "s").timestamp(far).into_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let ancient = Utc.with_ymd_and_hms(-1, 12, 31, 0, 0, 0).unwrap();
        let err = NewEvent::new("A", "s").timestamp(ancient).into_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let row = NewEvent::new("A", "s").timestamp(last).into_row().unwrap();
        assert_eq!(row.timestamp_iso, "9999-12-31T23:59:59.000000000Z");
    }

    #[test]
    fn out_of_range_bounds_do_not_break_filtering() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("A", "s").timestamp(base_time()));
        let far = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).unwrap();
        let ancient = Utc.with_ymd_and_hms(-1, 1, 1, 0, 0, 0).unwrap();

        assert!(query(&conn, &EventQuery::new().since(far)).unwrap().is_empty());
        assert_eq!(count(&conn, &EventQuery::new().since(far)).unwrap(), 0);
        assert!(query(&conn, &EventQuery::new().until(ancient)).unwrap().is_empty());

        let open = EventQuery::new().since(ancient).until(far);
        assert_eq!(query(&conn, &open).unwrap().len(), 1);
        assert_eq!(count(&conn, &open).unwrap(), 1);
    }

    #[test]
    fn unparseable_timestamp_is_marked_not_fatal() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("GOOD", "s").timestamp(base_time()));
        conn.execute(
            "INSERT INTO events (timestamp_iso, event_type, source) VALUES ('garbage', 'BAD', 's')",
            [],
        )
        .unwrap();

        let events = query(&conn, &EventQuery::new()).unwrap();
        assert_eq!(events.len(), 2);
        let bad = events.iter().find(|e| e.event_type == "BAD").unwrap();
        assert_eq!(bad.unparsed_timestamp.as_deref(), Some("garbage"));
        assert_eq!(bad.timestamp, DateTime::<Utc>::default());
        assert_eq!(bad.stored_timestamp(), "garbage");

        let good = events.iter().find(|e| e.event_type == "GOOD").unwrap();
        assert!(good.unparsed_timestamp.is_none());
        assert_eq!(good.timestamp, base_time());
        assert_eq!(good.stored_timestamp(), "2024-05-01T12:00:00.000000000Z");
    }

    #[test]
    fn ids_follow_insertion_not_timestamp() {
        let conn = setup_conn();
        let late = log(&conn, NewEvent::new("A", "s").timestamp(base_time()));
        let early = log(
            &conn,
            NewEvent::new("B", "s").timestamp(base_time() - Duration::days(30)),
        );
        assert!(early > late);

        let events = query(&conn, &EventQuery::new()).unwrap();
        assert_eq!(events[0].id, late);
        assert_eq!(events[1].id, early);
    }

    #[test]
    fn filters_combine_with_and() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("USER_INPUT", "Console").correlation_id("c1"));
        log(&conn, NewEvent::new("USER_INPUT", "Web").correlation_id("c1"));
        log(&conn, NewEvent::new("AGENT_ACTION", "Console").correlation_id("c2"));

        let q = EventQuery::new().event_type("USER_INPUT").source("Console");
        let events = query(&conn, &q).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "Console");
        assert_eq!(count(&conn, &q).unwrap(), 1);

        let q = EventQuery::new().correlation_id("c1");
        assert_eq!(count(&conn, &q).unwrap(), 2);
        assert_eq!(count(&conn, &EventQuery::new()).unwrap(), 3);
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let conn = setup_conn();
        for hours in 0..5 {
            log(
                &conn,
                NewEvent::new("TICK", "clock").timestamp(base_time() + Duration::hours(hours)),
            );
        }

        let q = EventQuery::new()
            .since(base_time() + Duration::hours(1))
            .until(base_time() + Duration::hours(3))
            .ascending();
        let events = query(&conn, &q).unwrap();
        let hours: Vec<i64> = events
            .iter()
            .map(|e| (e.timestamp - base_time()).num_hours())
            .collect();
        assert_eq!(hours, vec![1, 2, 3]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let conn = setup_conn();
        let first = log(&conn, NewEvent::new("A", "s").timestamp(base_time()));
        let second = log(&conn, NewEvent::new("B", "s").timestamp(base_time()));

        let desc = query(&conn, &EventQuery::new()).unwrap();
        assert_eq!(desc[0].id, second);
        let asc = query(&conn, &EventQuery::new().ascending()).unwrap();
        assert_eq!(asc[0].id, first);
    }

    #[test]
    fn limit_zero_returns_nothing() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("A", "s"));
        assert!(query(&conn, &EventQuery::new().limit(0)).unwrap().is_empty());
    }

    #[test]
    fn details_round_trip_and_absent_stays_absent() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("A", "s").details(&json!({"nested": [1, {"x": null}]})));
        log(&conn, NewEvent::new("B", "s").details(&json!({})));
        log(&conn, NewEvent::new("C", "s"));

        let events = query(&conn, &EventQuery::new().ascending()).unwrap();
        assert_eq!(
            events[0].details_value(),
            Some(&json!({"nested": [1, {"x": null}]}))
        );
        assert_eq!(events[1].details_value(), Some(&json!({})));
        assert!(events[2].details.is_none());
    }

    #[test]
    fn corrupt_details_do_not_hide_other_rows() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("GOOD", "s").details(&json!({"ok": true})));
        conn.execute(
            "INSERT INTO events (timestamp_iso, event_type, source, details_json) \
             VALUES ('2099-01-01T00:00:00.000000000Z', 'BAD', 's', '{broken')",
            [],
        )
        .unwrap();

        let events = query(&conn, &EventQuery::new()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "BAD");
        assert!(events[0].details.as_ref().unwrap().is_undecodable());
        assert_eq!(events[1].details_value(), Some(&json!({"ok": true})));
    }

    #[test]
    fn filter_values_are_bound_not_spliced() {
        let conn = setup_conn();
        log(&conn, NewEvent::new("A", "s"));
        let q = EventQuery::new().source("s' OR '1'='1");
        assert!(query(&conn, &q).unwrap().is_empty());
    }
}
