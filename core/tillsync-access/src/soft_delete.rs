//! Soft delete, restore and purge.
//!
//! Deleting a record only stamps `deleted_at`/`deleted_by`; the payload stays
//! until an explicit purge. Restore clears those two fields and nothing else.

use crate::error::{AccessError, AccessResult};
use std::sync::Arc;
use tillsync_store::{EmbeddedStore, IndexQuery};
use tillsync_types::{ActorId, Clock, Collection, Record, RecordId, RecordKey, TenantId, Timestamp};
use tracing::{info, warn};

/// Outcome of a bulk restore. Each record is restored independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// The records as they stand after restore.
    pub restored: Vec<Record>,
    pub failed: Vec<(RecordId, String)>,
}

pub struct SoftDelete {
    store: EmbeddedStore,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SoftDelete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDelete").field("store", &self.store).finish()
    }
}

impl SoftDelete {
    pub fn new(store: EmbeddedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Marks a record deleted by `actor_id` and returns the updated record.
    ///
    /// Deleting an already deleted record keeps the original deletion stamp.
    pub async fn soft_delete(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
        id: &RecordId,
        actor_id: &ActorId,
    ) -> AccessResult<Record> {
        let mut record = self.load(collection, tenant_id, id).await?;
        if record.is_deleted() {
            return Ok(record);
        }
        record.mark_deleted(actor_id.clone(), self.clock.now());
        self.store.put(collection, record.clone()).await?;
        info!("Soft-deleted {}/{} in tenant {} by {}", collection, id, tenant_id, actor_id);
        Ok(record)
    }

    /// Clears the deletion stamp of a soft-deleted record and stamps the
    /// restore time.
    pub async fn restore(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
        id: &RecordId,
    ) -> AccessResult<Record> {
        let mut record = self.load(collection, tenant_id, id).await?;
        if !record.is_deleted() {
            return Err(AccessError::NotDeleted {
                collection,
                id: id.clone(),
            });
        }
        record.mark_restored(self.clock.now());
        self.store.put(collection, record.clone()).await?;
        info!("Restored {}/{} in tenant {}", collection, id, tenant_id);
        Ok(record)
    }

    /// Restores every record deleted within `[start, end]` (inclusive).
    pub async fn restore_by_time_range(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
        start: Timestamp,
        end: Timestamp,
    ) -> AccessResult<RestoreReport> {
        let candidates: Vec<RecordId> = self
            .list_deleted(collection, tenant_id)
            .await?
            .into_iter()
            .filter(|r| r.deleted_at.is_some_and(|at| at >= start && at <= end))
            .map(|r| r.id)
            .collect();

        let mut report = RestoreReport::default();
        for id in candidates {
            match self.restore(collection, tenant_id, &id).await {
                Ok(record) => report.restored.push(record),
                Err(e) => {
                    warn!("Failed to restore {}/{}: {}", collection, id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Only the tenant's soft-deleted records.
    pub async fn list_deleted(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
    ) -> AccessResult<Vec<Record>> {
        let all = self
            .store
            .get_all_by_index(collection, &IndexQuery::Tenant(tenant_id.clone()), true)
            .await?;
        Ok(all.into_iter().filter(Record::is_deleted).collect())
    }

    /// Physically removes a soft-deleted record.
    pub async fn purge(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
        id: &RecordId,
    ) -> AccessResult<()> {
        let record = self.load(collection, tenant_id, id).await?;
        if !record.is_deleted() {
            return Err(AccessError::NotDeleted {
                collection,
                id: id.clone(),
            });
        }
        let key = RecordKey::new(tenant_id.clone(), id.clone());
        self.store.delete_hard(collection, &key).await?;
        info!("Purged {}/{} from tenant {}", collection, id, tenant_id);
        Ok(())
    }

    async fn load(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
        id: &RecordId,
    ) -> AccessResult<Record> {
        let key = RecordKey::new(tenant_id.clone(), id.clone());
        self.store
            .get(collection, &key)
            .await?
            .ok_or_else(|| AccessError::NotFound {
                collection,
                id: id.clone(),
            })
    }
}
