//! Error types for the cpas-memory crate.
//!
//! All store operations return [`StoreError`] via [`StoreResult`].
//! Every variant maps onto exactly one [`ErrorKind`], so callers can branch
//! on the failure class without matching on engine details.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the structured store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store never opened successfully, or has been closed.
    #[error("structured store unavailable")]
    Unavailable,

    /// A required caller-supplied field was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A payload could not be encoded to the storage format.
    #[error("payload serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A stored payload could not be decoded.
    #[error("payload for {context} could not be decoded: {source}")]
    Deserialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },
}

/// Coarse failure classes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unavailable,
    InvalidArgument,
    SerializationFailure,
    DeserializationFailure,
    StorageFault,
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable => ErrorKind::Unavailable,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Serialization(_) => ErrorKind::SerializationFailure,
            Self::Deserialization { .. } => ErrorKind::DeserializationFailure,
            Self::Sqlite(_) | Self::Migration { .. } => ErrorKind::StorageFault,
        }
    }

    /// `true` when the error leaves the connection itself unusable.
    ///
    /// These faults move the store into the degraded state.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::NotADatabase
                    | rusqlite::ErrorCode::DatabaseCorrupt
            ),
            _ => false,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
