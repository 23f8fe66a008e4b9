//! SQLite connection lifecycle.
//!
//! The [`Database`] owns exactly one `rusqlite::Connection` behind a
//! `Mutex<Option<..>>`. `None` means the store is degraded: it either never
//! opened, was closed, or hit a connection-level fault. Every access goes
//! through [`Database::with_conn`], which reports [`StoreError::Unavailable`]
//! in that state instead of touching SQLite.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Where the backing database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A file on disk, created if missing.
    File(PathBuf),
    /// A transient database that vanishes on close.
    InMemory,
}

impl StoreLocation {
    /// Parse a user-facing location string; `":memory:"` selects [`Self::InMemory`].
    pub fn parse(raw: &str) -> Self {
        if raw == ":memory:" {
            Self::InMemory
        } else {
            Self::File(PathBuf::from(raw))
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, Self::InMemory)
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::InMemory => f.write_str(":memory:"),
        }
    }
}

impl From<&Path> for StoreLocation {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<PathBuf> for StoreLocation {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&str> for StoreLocation {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Connection tuning applied as pragmas at open.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Use WAL journaling for file-backed stores.
    pub journal_wal: bool,
    /// Enforce foreign keys (`agent_knowledge.source_event_id`).
    pub foreign_keys: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            journal_wal: true,
            foreign_keys: true,
        }
    }
}

/// Observable health of a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    /// Connection open, schema in place.
    Ready,
    /// Never opened, closed, or lost its connection.
    Degraded,
}

/// Single-connection handle to the backing database.
pub struct Database {
    conn: Mutex<Option<Connection>>,
    location: StoreLocation,
}

impl Database {
    /// Open `location`, apply pragmas, and run pending migrations.
    pub fn open(location: StoreLocation, options: &StoreOptions) -> StoreResult<Self> {
        let conn = Self::connect(&location, options)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            location,
        })
    }

    /// A handle with no connection. Every operation reports unavailability.
    pub fn degraded(location: StoreLocation) -> Self {
        Self {
            conn: Mutex::new(None),
            location,
        }
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn health(&self) -> StoreHealth {
        if self.lock().is_some() {
            StoreHealth::Ready
        } else {
            StoreHealth::Degraded
        }
    }

    /// Run `f` against the live connection.
    ///
    /// Returns [`StoreError::Unavailable`] when degraded. A connection-level
    /// fault drops the connection so later calls see the degraded state.
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let mut guard = self.lock();
        let conn = guard.as_ref().ok_or(StoreError::Unavailable)?;
        let result = f(conn);

        if let Err(err) = &result {
            if err.is_connection_fault() {
                error!(
                    location = %self.location,
                    error = %err,
                    "connection-level fault, degrading store"
                );
                if let Some(conn) = guard.take() {
                    Self::close_connection(conn, &self.location);
                }
            }
        }

        result
    }

    /// Release the connection. Safe to call repeatedly or when degraded.
    pub fn close(&self) {
        let taken = self.lock().take();
        match taken {
            Some(conn) => {
                Self::close_connection(conn, &self.location);
                info!(location = %self.location, "structured store closed");
            }
            None => debug!(location = %self.location, "close on inactive store ignored"),
        }
    }

    // ── internals ────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // Every operation is a single statement; a poisoned lock still
        // guards a consistent connection.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(location: &StoreLocation, options: &StoreOptions) -> StoreResult<Connection> {
        info!(location = %location, "opening structured store");

        let conn = match location {
            StoreLocation::File(path) => Connection::open(path)?,
            StoreLocation::InMemory => Connection::open_in_memory()?,
        };
        Self::apply_pragmas(&conn, location, options)?;
        migration::run_all(&conn)?;

        Ok(conn)
    }

    fn close_connection(conn: Connection, location: &StoreLocation) {
        if let Err((_conn, err)) = conn.close() {
            // The connection is dropped here regardless; SQLite finalizes it.
            warn!(location = %location, error = %err, "error while closing connection");
        }
    }

    /// Apply pragmas to a fresh connection.
    fn apply_pragmas(
        conn: &Connection,
        location: &StoreLocation,
        options: &StoreOptions,
    ) -> StoreResult<()> {
        debug!("applying SQLite pragmas");

        // Touch the file header so a foreign or unreadable file fails at open.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;

        if options.journal_wal && !location.is_in_memory() {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        conn.pragma_update(None, "foreign_keys", if options.foreign_keys { "ON" } else { "OFF" })?;
        conn.busy_timeout(options.busy_timeout)?;

        debug!(
            wal = options.journal_wal,
            busy_timeout_ms = options.busy_timeout.as_millis() as u64,
            "pragmas applied"
        );
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("health", &self.health())
            .finish()
    }
}

// ── tests ────────────────────────────────────────────────────────────
