//! Error types for the cache layer.

use thiserror::Error;
use tillsync_access::AccessError;
use tillsync_store::StoreError;
use tillsync_sync::SyncError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Connectivity was lost mid-refresh; nothing was replaced.
    #[error("connectivity lost during refresh")]
    Offline,
}
