//! Subcommand implementations.
//!
//! Each command writes its output to the supplied writer so tests can
//! capture it; `main.rs` passes stdout.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime};
use cpas_memory::{Event, EventQuery, EventTime, NewEvent, Payload, StoredPayload, StructuredStore};
use serde_json::json;

use crate::cli::StateAction;

/// Parse an RFC 3339 time, or a bare `YYYY-MM-DDTHH:MM:SS[.f]` taken as UTC.
pub fn parse_time(raw: &str) -> Result<EventTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.into());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(EventTime::from)
        .with_context(|| format!("invalid timestamp '{raw}' (expected RFC 3339)"))
}

fn parse_json(raw: &str, what: &str) -> Result<Payload> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON"))
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

pub fn status(store: &StructuredStore, out: &mut impl Write) -> Result<()> {
    let version = store.schema_version()?;
    let events = store.count_events(&EventQuery::new())?;
    let keys = store.list_state_keys()?.len();

    writeln!(out, "location:       {}", store.location())?;
    writeln!(out, "health:         {:?}", store.health())?;
    writeln!(out, "schema version: {version}")?;
    writeln!(out, "events:         {events}")?;
    writeln!(out, "state keys:     {keys}")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

pub fn log(
    store: &StructuredStore,
    out: &mut impl Write,
    event_type: &str,
    source: &str,
    details: Option<&str>,
    correlation: Option<&str>,
    timestamp: Option<&str>,
) -> Result<()> {
    let mut event = NewEvent::new(event_type, source);
    if let Some(details) = details {
        event = event.payload(parse_json(details, "--details")?);
    }
    if let Some(correlation) = correlation {
        event = event.correlation_id(correlation);
    }
    if let Some(raw) = timestamp {
        event = event.timestamp(parse_time(raw)?);
    }

    let id = store.log_event(event).context("failed to log event")?;
    writeln!(out, "{id}")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

/// Raw filter arguments for [`events`].
#[derive(Debug, Default)]
pub struct EventFilters<'a> {
    pub event_type: Option<&'a str>,
    pub source: Option<&'a str>,
    pub correlation: Option<&'a str>,
    pub since: Option<&'a str>,
    pub until: Option<&'a str>,
    pub limit: Option<usize>,
    pub ascending: bool,
}

impl EventFilters<'_> {
    pub fn to_query(&self) -> Result<EventQuery> {
        let mut query = EventQuery::new();
        if let Some(event_type) = self.event_type {
            query = query.event_type(event_type);
        }
        if let Some(source) = self.source {
            query = query.source(source);
        }
        if let Some(correlation) = self.correlation {
            query = query.correlation_id(correlation);
        }
        if let Some(since) = self.since {
            query = query.since(parse_time(since)?);
        }
        if let Some(until) = self.until {
            query = query.until(parse_time(until)?);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if self.ascending {
            query = query.ascending();
        }
        Ok(query)
    }
}

pub fn events(
    store: &StructuredStore,
    out: &mut impl Write,
    filters: &EventFilters<'_>,
    as_json: bool,
) -> Result<()> {
    let events = store
        .query_events(&filters.to_query()?)
        .context("failed to query events")?;

    for event in &events {
        if as_json {
            writeln!(out, "{}", event_json(event))?;
        } else {
            writeln!(out, "{}", event_line(event))?;
        }
    }
    Ok(())
}

fn details_json(details: Option<&StoredPayload>) -> Payload {
    match details {
        None => Payload::Null,
        Some(StoredPayload::Decoded(value)) => value.clone(),
        Some(StoredPayload::Undecodable { raw, reason }) => {
            json!({ "undecodable": raw, "reason": reason })
        }
    }
}

fn event_json(event: &Event) -> Payload {
    json!({
        "id": event.id,
        "timestamp": event.stored_timestamp(),
        "event_type": event.event_type,
        "source": event.source,
        "correlation_id": event.correlation_id,
        "details": details_json(event.details.as_ref()),
    })
}

fn event_line(event: &Event) -> String {
    let mut line = format!(
        "#{} {} [{}] ({})",
        event.id,
        event.stored_timestamp(),
        event.event_type,
        event.source
    );
    if let Some(correlation) = &event.correlation_id {
        line.push_str(&format!(" corr={correlation}"));
    }
    match &event.details {
        None => {}
        Some(StoredPayload::Decoded(value)) => line.push_str(&format!(" {value}")),
        Some(StoredPayload::Undecodable { .. }) => line.push_str(" <undecodable details>"),
    }
    line
}

// ---------------------------------------------------------------------------
// state
// ---------------------------------------------------------------------------

pub fn state(store: &StructuredStore, out: &mut impl Write, action: &StateAction) -> Result<()> {
    match action {
        StateAction::Get { key } => match store.get_state(key)? {
            Some(value) => writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?,
            None => bail!("no state stored under '{key}'"),
        },
        StateAction::Set { key, value } => {
            store.set_state(key, &parse_json(value, "value")?)?;
        }
        StateAction::Delete { key } => {
            if !store.delete_state(key)? {
                bail!("no state stored under '{key}'");
            }
        }
        StateAction::List => {
            for key in store.list_state_keys()? {
                writeln!(out, "{key}")?;
            }
        }
    }
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
