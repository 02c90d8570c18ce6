//! SQLite storage layer for TillSync.
//!
//! Provides the persistent, tenant-partitioned store the rest of the stack
//! sits on. SQLite is opened in WAL mode so several processes (or tabs) can
//! share one file.
//!
//! # Architecture
//!
//! - One table per collection, keyed by `(tenant_id, id)`, records kept as JSON
//! - Secondary indexes `by_tenant` and `by_tenant_branch`, with a scan fallback
//! - Ordered, transactional schema migrations tracked in `user_version`
//! - The durable sync queue, its dead letters, refresh metadata and drain leases
//! - Daily per-tenant snapshots

mod backup;
mod error;
mod meta;
pub mod migration;
mod queue;
mod store;

pub use backup::{Snapshot, SnapshotInfo};
pub use error::{StoreError, StoreResult};
pub use migration::{MigrationReport, SCHEMA_VERSION};
pub use queue::{AppendOutcome, FailureOutcome};
pub use store::{EmbeddedStore, IndexQuery};
