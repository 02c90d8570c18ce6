//! The tiered cache manager.
//!
//! Reads are served from the local store while it is fresh. A stale read
//! while online pulls the authoritative set from the remote, narrows it with
//! the collection's retention policy and swaps it in atomically. Offline, or
//! when the refresh fails, the stale local data is served as-is.

use crate::error::{CacheError, CacheResult};
use crate::policy::CachePolicies;
use std::collections::HashMap;
use std::sync::Arc;
use tillsync_access::{BranchFilter, ReadScope, TenantIsolation};
use tillsync_sync::{Connectivity, FetchQuery, SyncQueue, SyncTarget};
use tillsync_types::{
    BranchId, Clock, Collection, IdentityContext, Record, RecordId, SyncOperation, TenantId,
};
use tracing::{debug, info, warn};

pub struct TieredCache {
    access: TenantIsolation,
    queue: SyncQueue,
    target: Arc<dyn SyncTarget>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    policies: CachePolicies,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl TieredCache {
    pub fn new(
        access: TenantIsolation,
        queue: SyncQueue,
        target: Arc<dyn SyncTarget>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        policies: CachePolicies,
    ) -> Self {
        Self {
            access,
            queue,
            target,
            connectivity,
            clock,
            policies,
        }
    }

    pub fn policies(&self) -> &CachePolicies {
        &self.policies
    }

    /// Reads the caller's records, refreshing first when the local copy is stale.
    pub async fn read(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        filter_branch: Option<&BranchId>,
    ) -> CacheResult<Vec<Record>> {
        if BranchFilter::read_scope(ctx, filter_branch) == ReadScope::Denied {
            return Ok(Vec::new());
        }

        let store = self.access.store();
        let policy = self.policies.policy_for(collection);
        let last = store.last_refresh(&ctx.tenant_id, collection).await?;
        let now = self.clock.now();

        if policy.is_fresh(last, now) {
            debug!("Serving fresh {} for tenant {}", collection, ctx.tenant_id);
        } else if self.connectivity.is_online() {
            if let Err(e) = self.refresh(&ctx.tenant_id, collection).await {
                warn!(
                    "Refresh of {} for tenant {} failed, serving stale local data: {}",
                    collection, ctx.tenant_id, e
                );
            }
        } else {
            debug!(
                "Offline; serving stale {} for tenant {}",
                collection, ctx.tenant_id
            );
        }

        Ok(self.access.scoped_read(ctx, collection, filter_branch).await?)
    }

    /// Writes through to the local store and buffers the mutation for sync.
    ///
    /// The record stays visible locally even if the collection's policy
    /// would not retain it, until a later refresh re-applies the policy.
    pub async fn write(
        &self,
        ctx: &IdentityContext,
        operation: SyncOperation,
        record: Record,
    ) -> CacheResult<Record> {
        let stored = self.access.scoped_write(ctx, record).await?;
        self.queue
            .enqueue(
                &ctx.tenant_id,
                operation,
                stored.collection(),
                &stored.id,
                stored.clone(),
            )
            .await?;
        Ok(stored)
    }

    /// Forces the next read of the tenant's collection to refresh.
    pub async fn invalidate(&self, tenant_id: &TenantId, collection: Collection) -> CacheResult<()> {
        self.access
            .store()
            .clear_last_refresh(tenant_id, collection)
            .await?;
        Ok(())
    }

    /// Replaces the tenant's local copy of `collection` with the remote's
    /// authoritative set, keeping any local mutations not yet delivered.
    ///
    /// Mutations queued before the fetch are kept even if a drain delivers
    /// them while the fetch is on the wire and the fetched set predates them.
    ///
    /// Returns the number of records now stored locally.
    pub async fn refresh(&self, tenant_id: &TenantId, collection: Collection) -> CacheResult<usize> {
        let mut pending = self.pending_versions(tenant_id, collection).await?;
        let response = self
            .target
            .fetch(FetchQuery::full(tenant_id.clone(), collection))
            .await?;

        let now = self.clock.now();
        let remote: Vec<Record> = response
            .records
            .into_iter()
            .filter_map(|mut r| match &r.tenant_id {
                Some(t) if t != tenant_id => {
                    warn!(
                        "Remote returned {}/{} of tenant {} for tenant {}; dropped",
                        collection, r.id, t, tenant_id
                    );
                    None
                }
                _ if r.collection() != collection => {
                    warn!("Remote returned a {} record for {}; dropped", r.collection(), collection);
                    None
                }
                Some(_) => Some(r),
                None => {
                    r.tenant_id = Some(tenant_id.clone());
                    Some(r)
                }
            })
            .collect();
        let remote_count = remote.len();

        pending.extend(self.pending_versions(tenant_id, collection).await?);
        let policy = self.policies.policy_for(collection);
        let mut merged = policy.retention.apply(merge(collection, remote, &pending), now);
        for (id, local) in pending {
            if !merged.iter().any(|r| r.id == id) {
                merged.push(local);
            }
        }

        if !self.connectivity.is_online() {
            return Err(CacheError::Offline);
        }

        let store = self.access.store();
        let stored = store.replace_all(collection, tenant_id, merged).await?;
        store.set_last_refresh(tenant_id, collection, now).await?;
        info!(
            "Refreshed {} for tenant {}: {} remote, {} kept locally",
            collection, tenant_id, remote_count, stored
        );
        Ok(stored)
    }

    /// Latest queued payload per record of `collection`.
    async fn pending_versions(
        &self,
        tenant_id: &TenantId,
        collection: Collection,
    ) -> CacheResult<HashMap<RecordId, Record>> {
        let mut pending = HashMap::new();
        for entry in self.queue.entries(tenant_id).await? {
            if entry.collection == collection {
                pending.insert(entry.record_id, entry.payload);
            }
        }
        Ok(pending)
    }
}

/// Last-writer-wins merge of the remote set with undelivered local versions.
///
/// The local version survives unless the remote copy was written strictly
/// later, deletes and restores included; the losing side is logged and
/// dropped from the local copy.
fn merge(
    collection: Collection,
    remote: Vec<Record>,
    pending: &HashMap<RecordId, Record>,
) -> Vec<Record> {
    remote
        .into_iter()
        .map(|remote| match pending.get(&remote.id) {
            None => remote,
            Some(local) if remote.written_at() > local.written_at() => {
                warn!(
                    "Conflict on {}/{}: remote version is newer, pending local change ignored",
                    collection, remote.id
                );
                remote
            }
            Some(local) => {
                if *local != remote {
                    warn!(
                        "Conflict on {}/{}: pending local change kept over remote version",
                        collection, remote.id
                    );
                }
                local.clone()
            }
        })
        .collect()
}
