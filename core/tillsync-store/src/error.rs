//! Error types for the storage layer.

use thiserror::Error;
use tillsync_types::Collection;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The platform store could not be opened. Fatal and never retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record body does not belong to the collection it was written to.
    #[error("schema mismatch: {found} record written to {collection}")]
    SchemaMismatch {
        collection: Collection,
        found: Collection,
    },

    /// A record failed envelope validation (e.g. missing tenant).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Invalid data read back from the store.
    #[error("invalid data: {0}")]
    InvalidData(#[from] tillsync_types::Error),

    /// The blocking worker running a store operation failed.
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Whether the error means the store itself cannot be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Task(_))
    }
}
