//! Tenant isolation over the embedded store.
//!
//! Every read and write made on behalf of a caller goes through
//! [`TenantIsolation`], which stamps and scopes records with the caller's
//! tenant. The adapter underneath only ever sees tenant-keyed operations.

use crate::branch::{BranchFilter, ReadScope};
use crate::error::{AccessError, AccessResult};
use tillsync_store::{EmbeddedStore, IndexQuery};
use tillsync_types::{BranchId, Collection, IdentityContext, Record, RecordId, RecordKey};
use tracing::{debug, warn};

/// Tenant-scoped access to the store.
#[derive(Debug, Clone)]
pub struct TenantIsolation {
    store: EmbeddedStore,
}

impl TenantIsolation {
    pub fn new(store: EmbeddedStore) -> Self {
        Self { store }
    }

    /// The underlying adapter.
    pub fn store(&self) -> &EmbeddedStore {
        &self.store
    }

    /// Stamps `record` with the caller's tenant (and, for staff, branch) and persists it.
    ///
    /// A record naming another tenant is logged as an unauthorized write and
    /// re-stamped. Since records are keyed by `(tenant_id, id)`, the write
    /// lands in the caller's partition and the other tenant's row is never
    /// touched.
    pub async fn scoped_write(&self, ctx: &IdentityContext, mut record: Record) -> AccessResult<Record> {
        if !ctx.role.is_known() {
            return Err(AccessError::PermissionDenied(format!(
                "unrecognised role in tenant {}",
                ctx.tenant_id
            )));
        }

        match &record.tenant_id {
            Some(t) if *t != ctx.tenant_id => {
                warn!(
                    "Unauthorized write attempt: {} stamped with tenant {} by caller of tenant {}",
                    record.id, t, ctx.tenant_id
                );
                record.tenant_id = Some(ctx.tenant_id.clone());
            }
            Some(_) => {}
            None => record.tenant_id = Some(ctx.tenant_id.clone()),
        }

        let record = BranchFilter::authorize_write(ctx, record)?;
        let collection = record.collection();

        if !ctx.role.is_elevated() {
            let key = RecordKey::new(ctx.tenant_id.clone(), record.id.clone());
            if let Some(existing) = self.store.get(collection, &key).await? {
                if existing.branch_id != record.branch_id {
                    warn!(
                        "Staff of tenant {} tried to overwrite {}/{} owned by branch {:?}",
                        ctx.tenant_id, collection, record.id, existing.branch_id
                    );
                    return Err(AccessError::PermissionDenied(format!(
                        "{collection}/{} belongs to another branch",
                        record.id
                    )));
                }
            }
        }

        self.store.put(collection, record.clone()).await?;
        debug!("Scoped write {}/{} for tenant {}", collection, record.id, ctx.tenant_id);
        Ok(record)
    }

    /// The caller's live records in `collection`.
    ///
    /// Only owners may pass `filter_branch = None` to see every branch; staff
    /// are confined to their own branch either way.
    pub async fn scoped_read(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        filter_branch: Option<&BranchId>,
    ) -> AccessResult<Vec<Record>> {
        let scope = BranchFilter::read_scope(ctx, filter_branch);
        let query = match &scope {
            ReadScope::Denied => return Ok(Vec::new()),
            ReadScope::AllBranches => IndexQuery::Tenant(ctx.tenant_id.clone()),
            ReadScope::Branch(b) => IndexQuery::TenantBranch(ctx.tenant_id.clone(), b.clone()),
        };
        let records = self.store.get_all_by_index(collection, &query, false).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.tenant_id.as_ref() == Some(&ctx.tenant_id))
            .filter(|r| BranchFilter::is_visible(&scope, r))
            .collect())
    }

    /// Point lookup of a live record visible to the caller.
    pub async fn scoped_get(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        id: &RecordId,
    ) -> AccessResult<Option<Record>> {
        let scope = BranchFilter::read_scope(ctx, None);
        if scope == ReadScope::Denied {
            return Ok(None);
        }
        let key = RecordKey::new(ctx.tenant_id.clone(), id.clone());
        Ok(self
            .store
            .get(collection, &key)
            .await?
            .filter(|r| !r.is_deleted() && BranchFilter::is_visible(&scope, r)))
    }
}
