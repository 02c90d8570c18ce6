//! TillSync engine.
//!
//! One entry point over the local-first stack: every call carries the
//! caller's [`IdentityContext`](tillsync_types::IdentityContext), writes are
//! durable locally before they return, and delivery to the remote happens in
//! the background through the sync queue.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tillsync_engine::{Engine, EngineConfig};
//! use tillsync_sync::ManualConnectivity;
//! use tillsync_types::{Collection, IdentityContext};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_json_file("tillsync.json")?;
//! let engine = Engine::open(config, Arc::new(ManualConnectivity::new(true))).await?;
//! let owner = IdentityContext::owner("tenant-1");
//! let stock = engine.read(&owner, Collection::Inventory, None).await?;
//! println!("{} items", stock.len());
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;

pub use config::{EngineConfig, DEFAULT_BACKUP_RETENTION_DAYS};
pub use engine::{BackupReport, Engine, Environment};
pub use error::{EngineError, EngineResult};
