//! Core type definitions for TillSync.
//!
//! This crate defines the fundamental types shared by every layer of the
//! local-first store:
//! - Tenant, branch, actor, record and queue entry identifiers
//! - Millisecond timestamps and the injectable [`Clock`]
//! - The caller's [`IdentityContext`]
//! - One typed schema per collection ([`RecordBody`]) inside a common [`Record`] envelope
//! - Sync queue entries and dead letters

mod identity;
mod ids;
mod queue;
mod record;
mod timestamp;

pub use identity::{IdentityContext, Role};
pub use ids::{ActorId, BranchId, EntryId, RecordId, TenantId};
pub use queue::{DeadLetter, EntryState, SyncOperation, SyncQueueEntry};
pub use record::{
    Collection, Customer, Expense, InventoryItem, Record, RecordBody, RecordKey, Sale, SaleLine,
    Supplier,
};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
