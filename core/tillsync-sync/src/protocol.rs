//! Wire messages exchanged with the remote sync target.
//!
//! The remote contract is request/response over two operations:
//! 1. Push: deliver buffered mutations, each tagged with its stable entry id
//! 2. Fetch: pull the authoritative set of one collection for a tenant
//!
//! The remote must treat a redelivered entry id as a no-op, which makes
//! at-least-once delivery from the queue safe.

use serde::{Deserialize, Serialize};
use tillsync_types::{
    Collection, EntryId, Record, RecordId, SyncOperation, SyncQueueEntry, TenantId, Timestamp,
};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// One mutation as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntry {
    pub entry_id: EntryId,
    pub operation: SyncOperation,
    pub collection: Collection,
    pub record_id: RecordId,
    pub payload: Record,
    pub enqueued_at: Timestamp,
}

impl From<&SyncQueueEntry> for PushEntry {
    fn from(entry: &SyncQueueEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            operation: entry.operation,
            collection: entry.collection,
            record_id: entry.record_id.clone(),
            payload: entry.payload.clone(),
            enqueued_at: entry.enqueued_at,
        }
    }
}

/// `POST /sync` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub tenant_id: TenantId,
    pub entries: Vec<PushEntry>,
}

/// An entry the remote refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub id: EntryId,
    pub reason: String,
}

/// `POST /sync` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub accepted: Vec<EntryId>,
    #[serde(default)]
    pub rejected: Vec<Rejection>,
}

impl PushResponse {
    /// Whether `id` was acknowledged.
    #[must_use]
    pub fn is_accepted(&self, id: EntryId) -> bool {
        self.accepted.contains(&id)
    }

    /// The remote's reason for refusing `id`, if it did.
    #[must_use]
    pub fn rejection(&self, id: EntryId) -> Option<&str> {
        self.rejected
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.reason.as_str())
    }
}

/// `GET /sync` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchQuery {
    pub tenant_id: TenantId,
    pub collection: Collection,
    /// Only records updated at or after this instant. `None` fetches the full set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
}

impl FetchQuery {
    pub fn full(tenant_id: TenantId, collection: Collection) -> Self {
        Self {
            tenant_id,
            collection,
            since: None,
        }
    }
}

/// `GET /sync` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub records: Vec<Record>,
}
