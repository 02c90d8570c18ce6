//! HTTP API and in-memory state for the TillSync relay.
//!
//! The relay is a minimal remote sync target:
//! - `POST /sync` applies pushed mutations. Entry ids already seen are
//!   acknowledged again without being re-applied. A newer or equal
//!   `updatedAt` replaces the stored record; an older one is acknowledged
//!   and dropped.
//! - `GET /sync?tenantId=&collection=&since=` returns the tenant's records,
//!   optionally only those updated at or after `since` (ms).

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tillsync_sync::{FetchResponse, PushEntry, PushRequest, PushResponse, Rejection, PROTOCOL_VERSION};
use tillsync_types::{Collection, EntryId, Record, RecordId, TenantId, Timestamp};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Inner {
    seen: HashSet<EntryId>,
    records: HashMap<(TenantId, Collection), BTreeMap<RecordId, Record>>,
}

/// Shared relay state. Cloning shares it.
#[derive(Clone, Default)]
pub struct RelayState {
    inner: Arc<Mutex<Inner>>,
}

/// What happened to one pushed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Applied {
    Stored,
    Stale,
    Duplicate,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a push and builds the acknowledgment.
    pub async fn apply_push(&self, request: PushRequest) -> PushResponse {
        let mut inner = self.inner.lock().await;
        let mut response = PushResponse::default();
        for entry in request.entries {
            let id = entry.entry_id;
            match inner.apply(&request.tenant_id, entry) {
                Ok(applied) => {
                    debug!("Entry {} for tenant {}: {:?}", id, request.tenant_id, applied);
                    response.accepted.push(id);
                }
                Err(reason) => {
                    warn!("Rejected entry {} for tenant {}: {}", id, request.tenant_id, reason);
                    response.rejected.push(Rejection { id, reason });
                }
            }
        }
        response
    }

    /// The tenant's records of `collection` updated at or after `since`.
    pub async fn records(
        &self,
        tenant_id: &TenantId,
        collection: Collection,
        since: Option<Timestamp>,
    ) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner
            .records
            .get(&(tenant_id.clone(), collection))
            .map(|records| {
                records
                    .values()
                    .filter(|r| since.is_none_or(|since| r.written_at() >= since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Seeds a record directly, bypassing the push path.
    pub async fn insert(&self, record: Record) {
        let mut inner = self.inner.lock().await;
        if let Some(tenant_id) = record.tenant_id.clone() {
            inner
                .records
                .entry((tenant_id, record.collection()))
                .or_default()
                .insert(record.id.clone(), record);
        }
    }

    /// Distinct entry ids applied so far.
    pub async fn applied_count(&self) -> usize {
        self.inner.lock().await.seen.len()
    }
}

impl Inner {
    fn apply(&mut self, tenant_id: &TenantId, entry: PushEntry) -> Result<Applied, String> {
        if self.seen.contains(&entry.entry_id) {
            return Ok(Applied::Duplicate);
        }
        let mut record = entry.payload;
        match &record.tenant_id {
            Some(t) if t != tenant_id => {
                return Err(format!("tenant mismatch: payload belongs to {t}"));
            }
            Some(_) => {}
            None => record.tenant_id = Some(tenant_id.clone()),
        }
        if record.collection() != entry.collection || record.id != entry.record_id {
            return Err(format!(
                "payload {}/{} does not match entry {}/{}",
                record.collection(),
                record.id,
                entry.collection,
                entry.record_id
            ));
        }

        self.seen.insert(entry.entry_id);
        let records = self
            .records
            .entry((tenant_id.clone(), entry.collection))
            .or_default();
        match records.get(&record.id) {
            Some(stored) if stored.written_at() > record.written_at() => Ok(Applied::Stale),
            _ => {
                records.insert(record.id.clone(), record);
                Ok(Applied::Stored)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchParams {
    tenant_id: TenantId,
    collection: Collection,
    since: Option<i64>,
}

/// `GET /health` body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub protocol_version: u32,
}

async fn push_handler(
    State(state): State<RelayState>,
    Json(request): Json<PushRequest>,
) -> Json<PushResponse> {
    let count = request.entries.len();
    let tenant_id = request.tenant_id.clone();
    let response = state.apply_push(request).await;
    info!(
        "Push from tenant {}: {} entries, {} accepted, {} rejected",
        tenant_id,
        count,
        response.accepted.len(),
        response.rejected.len()
    );
    Json(response)
}

async fn fetch_handler(
    State(state): State<RelayState>,
    Query(params): Query<FetchParams>,
) -> Json<FetchResponse> {
    let since = params.since.map(Timestamp::from_millis);
    let records = state.records(&params.tenant_id, params.collection, since).await;
    debug!(
        "Fetch {} for tenant {}: {} records",
        params.collection,
        params.tenant_id,
        records.len()
    );
    Json(FetchResponse { records })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        protocol_version: PROTOCOL_VERSION,
    })
}

/// Build the HTTP API router over the given state.
pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/sync", get(fetch_handler).post(push_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}
