//! # cpas-memory
//!
//! Structured memory for CPAS agents: an embedded SQLite store holding an
//! append-only event log and a mutable key-value state table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  StructuredStore  (health, logging)     │
//! ├─────────────────────────────────────────┤
//! │  event  (append, filtered query)        │
//! │  state  (upsert, get, delete)           │
//! │  payload (JSON text at the boundary)    │
//! ├─────────────────────────────────────────┤
//! │  Database (one rusqlite connection)     │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use cpas_memory::{EventQuery, NewEvent, StructuredStore};
//! use serde_json::json;
//!
//! let store = StructuredStore::open("data/cpas_memory.db");
//! store.log_event(
//!     NewEvent::new("USER_INPUT", "Console")
//!         .details(&json!({"text": "hi"}))
//!         .correlation_id("c1"),
//! )?;
//! let recent = store.query_events(&EventQuery::new().correlation_id("c1").limit(10))?;
//! store.set_state("prefs", &json!({"theme": "dark"}))?;
//! store.close();
//! ```

pub mod db;
pub mod error;
pub mod event;
pub mod migration;
pub mod payload;
pub mod state;
pub mod store;
pub mod timestamp;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::{StoreHealth, StoreLocation, StoreOptions};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use event::{Event, EventQuery, NewEvent, SortOrder};
pub use payload::{Payload, StoredPayload};
pub use state::StateEntry;
pub use store::StructuredStore;
pub use timestamp::EventTime;
