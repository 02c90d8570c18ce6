//! Durable sync for TillSync.
//!
//! Buffers local mutations in a store-backed queue and delivers them to a
//! remote target with bounded retry.
//!
//! # Architecture
//!
//! Writes are never blocked by the network. Every mutation is durable in the
//! local queue before `enqueue` returns; delivery happens afterwards, in
//! per-tenant FIFO order, whenever connectivity allows.
//!
//! ## Components
//!
//! - **Protocol**: the push/fetch messages exchanged with the remote
//! - **Transport**: the [`SyncTarget`] trait, with HTTP and mock implementations
//! - **Connectivity**: the injected online/offline signal
//! - **Queue**: the drain state machine, retries and dead letters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tillsync_store::EmbeddedStore;
//! use tillsync_sync::{HttpSyncTarget, HttpTargetConfig, ManualConnectivity, SyncConfig, SyncQueue};
//! use tillsync_types::SystemClock;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = EmbeddedStore::open("till.db").await?;
//! let target = HttpSyncTarget::new(HttpTargetConfig::default())?;
//! let queue = SyncQueue::new(
//!     store,
//!     Arc::new(target),
//!     Arc::new(ManualConnectivity::new(true)),
//!     Arc::new(SystemClock),
//!     SyncConfig::default(),
//! );
//! queue.drain(&"tenant-1".into()).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connectivity;
mod error;
mod http;
pub mod protocol;
mod queue;
pub mod transport;

pub use config::{SyncConfig, DEFAULT_MAX_ATTEMPTS};
pub use connectivity::{Connectivity, ManualConnectivity};
pub use error::{SyncError, SyncResult};
pub use http::{HttpSyncTarget, HttpTargetConfig};
pub use protocol::{
    FetchQuery, FetchResponse, PushEntry, PushRequest, PushResponse, Rejection, PROTOCOL_VERSION,
};
pub use queue::{DrainReport, DrainStop, SyncQueue};
pub use transport::SyncTarget;
