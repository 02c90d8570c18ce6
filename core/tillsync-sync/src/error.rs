//! Error types for the sync layer.

use thiserror::Error;
use tillsync_store::StoreError;
use tillsync_types::EntryId;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Delivery errors are absorbed by the drain loop and recorded on the entry;
/// only store errors reach callers of `enqueue`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The remote refused or did not acknowledge an entry.
    #[error("delivery of {entry_id} failed: {reason}")]
    DeliveryFailed { entry_id: EntryId, reason: String },

    /// No connectivity.
    #[error("offline")]
    Offline,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Network(e.to_string())
        }
    }
}
