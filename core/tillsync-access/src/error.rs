//! Error types for the access layer.

use thiserror::Error;
use tillsync_store::StoreError;
use tillsync_types::{Collection, RecordId};

/// Result type for access operations.
pub type AccessResult<T> = Result<T, AccessError>;

/// Errors returned by tenant isolation, branch filtering and soft delete.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The record does not exist in the caller's tenant.
    #[error("{collection}/{id} not found")]
    NotFound { collection: Collection, id: RecordId },

    /// Restore or purge of a record that is not soft-deleted.
    #[error("{collection}/{id} is not deleted")]
    NotDeleted { collection: Collection, id: RecordId },

    /// The caller's role does not allow the operation. Always surfaced.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),
}
