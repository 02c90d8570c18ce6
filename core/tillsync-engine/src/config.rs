//! Engine configuration.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tillsync_cache::CachePolicies;
use tillsync_sync::{HttpTargetConfig, SyncConfig};
use tracing::info;

/// Default number of days daily snapshots are kept.
pub const DEFAULT_BACKUP_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Database file. `None` keeps everything in memory.
    pub store_path: Option<PathBuf>,
    pub sync: SyncConfig,
    pub target: HttpTargetConfig,
    pub cache: CachePolicies,
    /// Daily snapshots older than this many days are pruned.
    pub backup_retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            sync: SyncConfig::default(),
            target: HttpTargetConfig::default(),
            cache: CachePolicies::default(),
            backup_retention_days: DEFAULT_BACKUP_RETENTION_DAYS,
        }
    }
}

impl EngineConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = serde_json::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("failed to parse {}: {e}", path.display())))?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }
}
