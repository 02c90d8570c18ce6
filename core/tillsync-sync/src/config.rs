//! Sync queue configuration.

use serde::{Deserialize, Serialize};

/// Default delivery attempts before an entry is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration for the durable sync queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed deliveries tolerated before an entry moves to dead letters.
    pub max_attempts: u32,
    /// Start a background drain after each enqueue while online.
    pub auto_drain: bool,
    /// Lifetime of the cross-process drain lease (ms). Renewed per entry.
    pub lease_ttl_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            auto_drain: true,
            lease_ttl_ms: 30_000,
        }
    }
}
