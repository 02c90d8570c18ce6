//! Sync queue entry types.
//!
//! An entry is a buffered local mutation awaiting delivery to the remote
//! target. It lives in the queue until acknowledged, or moves to the
//! dead-letter collection once its delivery attempts are exhausted.

use crate::{Collection, EntryId, Error, Record, RecordId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation carried by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }

    /// Folds a later mutation of the same record into this one.
    ///
    /// A record created and then updated before delivery is still a create;
    /// a delete always wins.
    #[must_use]
    pub const fn coalesce(self, later: SyncOperation) -> SyncOperation {
        match (self, later) {
            (_, SyncOperation::Delete) => SyncOperation::Delete,
            (SyncOperation::Create, _) => SyncOperation::Create,
            (_, later) => later,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(Error::InvalidValue(format!("unknown sync operation: {other}"))),
        }
    }
}

/// Delivery state of a queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting for (re)delivery.
    Pending,
    /// Handed to the transport; outcome not yet known.
    InFlight,
}

impl EntryState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::InFlight => "in_flight",
        }
    }
}

impl FromStr for EntryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryState::Pending),
            "in_flight" => Ok(EntryState::InFlight),
            other => Err(Error::InvalidValue(format!("unknown entry state: {other}"))),
        }
    }
}

/// A buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub entry_id: EntryId,
    pub tenant_id: TenantId,
    pub operation: SyncOperation,
    pub collection: Collection,
    pub record_id: RecordId,
    /// Snapshot of the record at enqueue time.
    pub payload: Record,
    pub enqueued_at: Timestamp,
    pub attempts: u32,
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncQueueEntry {
    /// Creates a fresh pending entry.
    pub fn new(
        tenant_id: TenantId,
        operation: SyncOperation,
        collection: Collection,
        record_id: RecordId,
        payload: Record,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            entry_id: EntryId::new(),
            tenant_id,
            operation,
            collection,
            record_id,
            payload,
            enqueued_at,
            attempts: 0,
            state: EntryState::Pending,
            last_error: None,
        }
    }
}

/// An entry that exhausted its delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub entry: SyncQueueEntry,
    pub dead_lettered_at: Timestamp,
}
