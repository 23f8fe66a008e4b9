//! The structured store: durable event log plus key-value state.
//!
//! [`StructuredStore`] never fails to construct. If the backing database
//! cannot be opened or its schema cannot be created, the instance starts
//! out degraded and every operation returns [`StoreError::Unavailable`].
//! Closing an instance puts it in the same state.
//!
//! All operations are synchronous and run on the caller's thread. Each
//! call is its own atomic unit of work; there is no multi-call transaction.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{Database, StoreHealth, StoreLocation, StoreOptions};
use crate::error::{StoreError, StoreResult};
use crate::event::{self, Event, EventQuery, NewEvent};
use crate::migration;
use crate::payload::{self, Payload};
use crate::state::{self, StateEntry};

/// Embedded event log and key-value state backed by one SQLite connection.
///
/// Share it across threads behind an `Arc`; the connection serializes calls.
/// Use one instance per backing file.
#[derive(Debug)]
pub struct StructuredStore {
    db: Database,
}

impl StructuredStore {
    /// Open or create the store at `location` with default options.
    pub fn open(location: impl Into<StoreLocation>) -> Self {
        Self::open_with(location, &StoreOptions::default())
    }

    /// Open a transient in-memory store.
    pub fn open_in_memory() -> Self {
        Self::open(StoreLocation::InMemory)
    }

    /// Open or create the store at `location`.
    ///
    /// Failure is logged and yields a degraded instance; check
    /// [`Self::health`] or any operation's result.
    pub fn open_with(location: impl Into<StoreLocation>, options: &StoreOptions) -> Self {
        let location = location.into();
        let db = match Database::open(location.clone(), options) {
            Ok(db) => {
                info!(location = %location, "structured store ready");
                db
            }
            Err(err) => {
                error!(
                    location = %location,
                    error = %err,
                    "failed to open structured store, continuing degraded"
                );
                Database::degraded(location)
            }
        };
        Self { db }
    }

    /// Open the store, returning the failure instead of degrading.
    pub fn try_open(location: impl Into<StoreLocation>, options: &StoreOptions) -> StoreResult<Self> {
        let db = Database::open(location.into(), options)?;
        Ok(Self { db })
    }

    pub fn health(&self) -> StoreHealth {
        self.db.health()
    }

    pub fn is_ready(&self) -> bool {
        self.health() == StoreHealth::Ready
    }

    pub fn location(&self) -> &StoreLocation {
        self.db.location()
    }

    /// Release the connection. Later operations return `Unavailable`.
    pub fn close(&self) {
        self.db.close();
    }

    // ── events ───────────────────────────────────────────────────────

    /// Append one event, returning its id.
    ///
    /// An unavailable store reports that first. Validation and payload
    /// encoding happen before the insert, so a failed call never leaves a
    /// partial row.
    #[instrument(skip(self, event), fields(event_type = %event.event_type(), source = %event.source()))]
    pub fn log_event(&self, event: NewEvent) -> StoreResult<i64> {
        let result = self
            .db
            .with_conn(|conn| event::insert(conn, &event.into_row()?));
        match &result {
            Ok(id) => debug!(id, "event logged"),
            Err(err) => report("log_event", err),
        }
        result
    }

    /// Events matching `query`. No match is an empty list, not an error.
    #[instrument(skip(self))]
    pub fn query_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let result = self.db.with_conn(|conn| event::query(conn, query));
        match &result {
            Ok(events) => debug!(count = events.len(), "events queried"),
            Err(err) => report("query_events", err),
        }
        result
    }

    /// Number of events matching `query`'s filters. The limit is ignored.
    #[instrument(skip(self))]
    pub fn count_events(&self, query: &EventQuery) -> StoreResult<u64> {
        let result = self.db.with_conn(|conn| event::count(conn, query));
        if let Err(err) = &result {
            report("count_events", err);
        }
        result
    }

    /// Record raw user input.
    pub fn log_user_input(&self, text: &str, correlation_id: Option<&str>) -> StoreResult<i64> {
        let event = NewEvent::new(event::USER_INPUT, "User").payload(json!({ "text": text }));
        self.log_event(with_correlation(event, correlation_id))
    }

    /// Record an agent's answer to `query`.
    pub fn log_agent_response(
        &self,
        query: &str,
        response: &str,
        agent_type: &str,
        metadata: Option<Payload>,
        correlation_id: Option<&str>,
    ) -> StoreResult<i64> {
        let event = NewEvent::new(event::AGENT_RESPONSE, agent_type).payload(json!({
            "query": query,
            "response": response,
            "metadata": metadata.unwrap_or(Payload::Null),
        }));
        self.log_event(with_correlation(event, correlation_id))
    }

    /// Record a failure while an agent served `query`.
    pub fn log_error(
        &self,
        query: &str,
        error_message: &str,
        agent_type: &str,
        correlation_id: Option<&str>,
    ) -> StoreResult<i64> {
        let event = NewEvent::new(event::ERROR, agent_type).payload(json!({
            "query": query,
            "error": error_message,
        }));
        self.log_event(with_correlation(event, correlation_id))
    }

    // ── state ────────────────────────────────────────────────────────

    /// Insert or fully replace the value stored under `key`.
    ///
    /// An unserializable value fails the call and leaves any existing
    /// value untouched. An unavailable store reports that first.
    #[instrument(skip(self, value))]
    pub fn set_state<T>(&self, key: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let result = self
            .db
            .with_conn(|conn| state::upsert(conn, key, &payload::encode_value(value)?));
        match &result {
            Ok(()) => debug!(key, "state set"),
            Err(err) => report("set_state", err),
        }
        result
    }

    /// Value under `key`, or `None` if absent.
    ///
    /// A stored value that cannot be decoded is a
    /// [`StoreError::Deserialization`], never `None`.
    #[instrument(skip(self))]
    pub fn get_state(&self, key: &str) -> StoreResult<Option<Payload>> {
        Ok(self.get_state_entry(key)?.map(|entry| entry.value))
    }

    /// Value plus last-updated time under `key`.
    #[instrument(skip(self))]
    pub fn get_state_entry(&self, key: &str) -> StoreResult<Option<StateEntry>> {
        let result = self
            .db
            .with_conn(|conn| state::fetch(conn, key))
            .and_then(|row| row.map(|row| row.decode(key)).transpose());
        if let Err(err) = &result {
            report("get_state", err);
        }
        result
    }

    /// Value under `key` decoded as `T`.
    pub fn get_state_as<T>(&self, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let result = self
            .db
            .with_conn(|conn| state::fetch(conn, key))
            .and_then(|row| {
                row.map(|row| payload::decode_as(&row.value_json, state::state_context(key)))
                    .transpose()
            });
        if let Err(err) = &result {
            report("get_state_as", err);
        }
        result
    }

    /// Remove `key`. Returns whether a row was actually removed.
    #[instrument(skip(self))]
    pub fn delete_state(&self, key: &str) -> StoreResult<bool> {
        let result = self.db.with_conn(|conn| state::delete(conn, key));
        match &result {
            Ok(true) => debug!(key, "state deleted"),
            Ok(false) => debug!(key, "state delete: key absent"),
            Err(err) => report("delete_state", err),
        }
        result
    }

    /// All state keys in ascending order.
    pub fn list_state_keys(&self) -> StoreResult<Vec<String>> {
        let result = self.db.with_conn(state::keys);
        if let Err(err) = &result {
            report("list_state_keys", err);
        }
        result
    }

    /// Applied schema version.
    pub fn schema_version(&self) -> StoreResult<u32> {
        self.db.with_conn(migration::current_version)
    }
}

impl Drop for StructuredStore {
    fn drop(&mut self) {
        if self.is_ready() {
            debug!(location = %self.location(), "closing structured store on drop");
            self.db.close();
        }
    }
}

fn with_correlation(event: NewEvent, correlation_id: Option<&str>) -> NewEvent {
    match correlation_id {
        Some(id) => event.correlation_id(id),
        None => event,
    }
}

fn report(operation: &'static str, err: &StoreError) {
    match err {
        StoreError::Unavailable => warn!(operation, "structured store unavailable"),
        StoreError::InvalidArgument(_) | StoreError::Serialization(_) => {
            warn!(operation, error = %err, "rejected")
        }
        _ => error!(operation, error = %err, "structured store operation failed"),
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn log_then_query_round_trips() {
        let store = StructuredStore::open_in_memory();
        assert!(store.is_ready());

        let id = store
            .log_event(
                NewEvent::new("USER_INPUT", "Console")
                    .details(&json!({"text": "hi"}))
                    .correlation_id("c1"),
            )
            .unwrap();

        let events = store
            .query_events(&EventQuery::new().correlation_id("c1"))
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.id, id);
        assert_eq!(event.event_type, "USER_INPUT");
        assert_eq!(event.source, "Console");
        assert_eq!(event.correlation_id.as_deref(), Some("c1"));
        assert_eq!(event.details_value(), Some(&json!({"text": "hi"})));
    }

    #[test]
    fn rejected_event_writes_nothing() {
        let store = StructuredStore::open_in_memory();
        let err = store.log_event(NewEvent::new("", "Console")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.count_events(&EventQuery::new()).unwrap(), 0);
    }

    #[test]
    fn conversation_helpers_use_well_known_types() {
        let store = StructuredStore::open_in_memory();
        store.log_user_input("what is 2+2?", Some("conv")).unwrap();
        store
            .log_agent_response(
                "what is 2+2?",
                "4",
                "SimpleAgent",
                Some(json!({"model": "llama3"})),
                Some("conv"),
            )
            .unwrap();
        store
            .log_error("what is 2+2?", "timeout", "SimpleAgent", None)
            .unwrap();

        let conv = store
            .query_events(&EventQuery::new().correlation_id("conv").ascending())
            .unwrap();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[0].event_type, event::USER_INPUT);
        assert_eq!(conv[0].source, "User");
        assert_eq!(conv[1].event_type, event::AGENT_RESPONSE);
        assert_eq!(conv[1].source, "SimpleAgent");
        assert_eq!(
            conv[1].details_value().unwrap()["metadata"],
            json!({"model": "llama3"})
        );

        let errors = store
            .query_events(&EventQuery::new().event_type(event::ERROR))
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].details_value().unwrap()["error"], "timeout");
        assert!(errors[0].correlation_id.is_none());
    }

    #[test]
    fn typed_state_round_trip() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Prefs {
            theme: String,
            font_size: u8,
        }

        let store = StructuredStore::open_in_memory();
        let prefs = Prefs {
            theme: "dark".into(),
            font_size: 12,
        };
        store.set_state("prefs", &prefs).unwrap();
        assert_eq!(store.get_state_as::<Prefs>("prefs").unwrap(), Some(prefs));
        assert_eq!(store.get_state_as::<Prefs>("missing").unwrap(), None);

        let err = store.get_state_as::<Vec<String>>("prefs").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationFailure);
    }

    #[test]
    fn failed_set_keeps_previous_value() {
        let store = StructuredStore::open_in_memory();
        store.set_state("k", &json!({"v": 1})).unwrap();

        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 1), 1);
        let err = store.set_state("k", &bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailure);
        assert_eq!(store.get_state("k").unwrap(), Some(json!({"v": 1})));
    }

    #[test]
    fn non_finite_values_are_rejected_not_nulled() {
        let store = StructuredStore::open_in_memory();
        store.set_state("k", &1.5).unwrap();

        let err = store.set_state("k", &f64::NAN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailure);
        assert_eq!(store.get_state("k").unwrap(), Some(json!(1.5)));

        let err = store
            .log_event(NewEvent::new("READING", "sensor").details(&vec![f64::INFINITY]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailure);
        assert_eq!(store.count_events(&EventQuery::new()).unwrap(), 0);
    }

    #[test]
    fn list_keys_and_schema_version() {
        let store = StructuredStore::open_in_memory();
        store.set_state("b", &1).unwrap();
        store.set_state("a", &2).unwrap();
        assert_eq!(store.list_state_keys().unwrap(), vec!["a", "b"]);
        assert_eq!(store.schema_version().unwrap(), migration::latest_version());
    }

    #[test]
    fn closed_store_is_unavailable_everywhere() {
        let store = StructuredStore::open_in_memory();
        store.close();
        store.close();
        assert_eq!(store.health(), StoreHealth::Degraded);

        let kinds = [
            store.log_event(NewEvent::new("A", "s")).unwrap_err().kind(),
            store.query_events(&EventQuery::new()).unwrap_err().kind(),
            store.set_state("k", &1).unwrap_err().kind(),
            store.get_state("k").unwrap_err().kind(),
            store.delete_state("k").unwrap_err().kind(),
            store.list_state_keys().unwrap_err().kind(),
            store.schema_version().unwrap_err().kind(),
        ];
        assert!(kinds.iter().all(|k| *k == ErrorKind::Unavailable));
    }

    #[test]
    fn closed_store_reports_unavailable_before_validating() {
        let store = StructuredStore::open_in_memory();
        store.close();

        let mut unserializable = std::collections::HashMap::new();
        unserializable.insert((1, 1), 1);
        let kinds = [
            store.log_event(NewEvent::new("", "s")).unwrap_err().kind(),
            store.log_event(NewEvent::new("A", " ")).unwrap_err().kind(),
            store
                .log_event(NewEvent::new("A", "s").details(&unserializable))
                .unwrap_err()
                .kind(),
            store.set_state("k", &unserializable).unwrap_err().kind(),
            store.set_state("k", &f64::NAN).unwrap_err().kind(),
            store.log_user_input("hi", None).unwrap_err().kind(),
        ];
        assert!(kinds.iter().all(|k| *k == ErrorKind::Unavailable), "{kinds:?}");
    }
}
