//! Key-value state over the `state` table.
//!
//! One row per key. Writes replace the whole value and refresh
//! `last_updated_iso`; deletes remove the row outright.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreResult;
use crate::payload::{self, Payload};
use crate::timestamp;

/// A state entry as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub key: String,
    pub value: Payload,
    pub last_updated: DateTime<Utc>,
}

/// Raw row: the value is still encoded.
pub(crate) struct StateRow {
    pub value_json: String,
    pub last_updated_iso: String,
}

impl StateRow {
    pub fn decode(self, key: &str) -> StoreResult<StateEntry> {
        let value = payload::decode(&self.value_json, state_context(key))?;
        // A foreign writer may leave an odd timestamp; the value still counts.
        let last_updated = timestamp::parse_iso(&self.last_updated_iso).unwrap_or_default();
        Ok(StateEntry {
            key: key.to_string(),
            value,
            last_updated,
        })
    }
}

pub(crate) fn state_context(key: &str) -> String {
    format!("state key '{key}'")
}

// ── SQL ──────────────────────────────────────────────────────────────

/// Insert or fully replace `key`.
pub(crate) fn upsert(conn: &Connection, key: &str, value_json: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO state (key, value_json, last_updated_iso) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET \
             value_json = excluded.value_json, \
             last_updated_iso = excluded.last_updated_iso",
        rusqlite::params![key, value_json, timestamp::now_iso()],
    )?;
    Ok(())
}

pub(crate) fn fetch(conn: &Connection, key: &str) -> StoreResult<Option<StateRow>> {
    let row = conn
        .query_row(
            "SELECT value_json, last_updated_iso FROM state WHERE key = ?1",
            [key],
            |row| {
                Ok(StateRow {
                    value_json: row.get(0)?,
                    last_updated_iso: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Delete `key`, returning `true` if a row was removed.
pub(crate) fn delete(conn: &Connection, key: &str) -> StoreResult<bool> {
    let deleted = conn.execute("DELETE FROM state WHERE key = ?1", [key])?;
    Ok(deleted > 0)
}

pub(crate) fn keys(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT key FROM state ORDER BY key ASC")?;
    let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::migration;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migration::run_all(&conn).unwrap();
        conn
    }

    fn get(conn: &Connection, key: &str) -> Option<Payload> {
        fetch(conn, key)
            .unwrap()
            .map(|row| row.decode(key).unwrap().value)
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let conn = setup_conn();
        assert!(fetch(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn upsert_overwrites_whole_value() {
        let conn = setup_conn();
        upsert(&conn, "prefs", r#"{"theme":"dark","font":"mono"}"#).unwrap();
        upsert(&conn, "prefs", r#"{"theme":"light"}"#).unwrap();
        assert_eq!(get(&conn, "prefs"), Some(json!({"theme": "light"})));
    }

    #[test]
    fn upsert_refreshes_last_updated() {
        let conn = setup_conn();
        conn.execute(
            "INSERT INTO state VALUES ('k', '1', '2000-01-01T00:00:00.000000000Z')",
            [],
        )
        .unwrap();
        upsert(&conn, "k", "2").unwrap();

        let entry = fetch(&conn, "k").unwrap().unwrap().decode("k").unwrap();
        assert_eq!(entry.value, json!(2));
        assert!(entry.last_updated.timestamp() > 946_684_800);
    }

    #[test]
    fn delete_existing_and_nonexistent() {
        let conn = setup_conn();
        upsert(&conn, "key1", "\"val\"").unwrap();
        assert!(delete(&conn, "key1").unwrap());
        assert!(fetch(&conn, "key1").unwrap().is_none());
        assert!(!delete(&conn, "key1").unwrap());
    }

    #[test]
    fn corrupt_value_is_not_missing() {
        let conn = setup_conn();
        conn.execute(
            "INSERT INTO state VALUES ('bad', 'not json', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let row = fetch(&conn, "bad").unwrap().expect("row exists");
        let err = row.decode("bad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationFailure);
    }

    #[test]
    fn keys_are_sorted() {
        let conn = setup_conn();
        for key in ["zeta", "alpha", "mid"] {
            upsert(&conn, key, "null").unwrap();
        }
        assert_eq!(keys(&conn).unwrap(), vec!["alpha", "mid", "zeta"]);
    }
}
