//! Error types for the engine facade.

use thiserror::Error;
use tillsync_access::AccessError;
use tillsync_cache::CacheError;
use tillsync_store::StoreError;
use tillsync_sync::SyncError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller was refused for lack of permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            EngineError::Access(AccessError::PermissionDenied(_))
                | EngineError::Cache(CacheError::Access(AccessError::PermissionDenied(_)))
        )
    }
}
