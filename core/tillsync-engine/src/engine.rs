//! The engine facade.
//!
//! Wires the store, access layer, sync queue and tiered cache over one
//! injectable [`Environment`], and enforces the caller's role on every
//! operation that is not already scoped by the layers below.

use crate::config::EngineConfig;
use crate::error::EngineResult;
use chrono::NaiveDate;
use std::sync::Arc;
use tillsync_access::{
    AccessError, BranchFilter, ReadScope, RestoreReport, SoftDelete, TenantIsolation,
};
use tillsync_cache::TieredCache;
use tillsync_store::{EmbeddedStore, Snapshot, SnapshotInfo};
use tillsync_sync::{
    Connectivity, DrainReport, HttpSyncTarget, SyncQueue, SyncTarget,
};
use tillsync_types::{
    ActorId, BranchId, Clock, Collection, DeadLetter, EntryId, IdentityContext, Record, RecordId,
    RecordKey, SyncOperation, SystemClock, TenantId, Timestamp,
};
use tracing::{debug, info};

/// Everything the engine needs from the outside world.
#[derive(Clone)]
pub struct Environment {
    pub clock: Arc<dyn Clock>,
    pub connectivity: Arc<dyn Connectivity>,
    pub store: EmbeddedStore,
    pub target: Arc<dyn SyncTarget>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Production environment: system clock, the configured store file and
    /// the HTTP sync target.
    pub async fn open(
        config: &EngineConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> EngineResult<Self> {
        let store = match &config.store_path {
            Some(path) => EmbeddedStore::open(path).await?,
            None => EmbeddedStore::open_in_memory().await?,
        };
        let target = HttpSyncTarget::new(config.target.clone())?;
        Ok(Self {
            clock: Arc::new(SystemClock),
            connectivity,
            store,
            target: Arc::new(target),
        })
    }
}

/// Outcome of [`Engine::daily_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// Today's snapshot, or `None` if one had already been taken.
    pub created: Option<SnapshotInfo>,
    /// Snapshots removed for being past retention.
    pub pruned: usize,
}

pub struct Engine {
    env: Environment,
    config: EngineConfig,
    access: TenantIsolation,
    soft_delete: SoftDelete,
    queue: SyncQueue,
    cache: TieredCache,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("env", &self.env)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(env: Environment, config: EngineConfig) -> Self {
        let access = TenantIsolation::new(env.store.clone());
        let soft_delete = SoftDelete::new(env.store.clone(), env.clock.clone());
        let queue = SyncQueue::new(
            env.store.clone(),
            env.target.clone(),
            env.connectivity.clone(),
            env.clock.clone(),
            config.sync.clone(),
        );
        let cache = TieredCache::new(
            access.clone(),
            queue.clone(),
            env.target.clone(),
            env.connectivity.clone(),
            env.clock.clone(),
            config.cache.clone(),
        );
        Self {
            env,
            config,
            access,
            soft_delete,
            queue,
            cache,
        }
    }

    /// Opens the production environment described by `config`.
    pub async fn open(config: EngineConfig, connectivity: Arc<dyn Connectivity>) -> EngineResult<Self> {
        let env = Environment::open(&config, connectivity).await?;
        info!(
            "Engine opened (store: {:?}, schema v{})",
            env.store.path(),
            env.store.schema_version().await?
        );
        Ok(Self::new(env, config))
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Records ─────────────────────────────────────────────────

    /// Live records of `collection` visible to the caller.
    pub async fn read(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        filter_branch: Option<&BranchId>,
    ) -> EngineResult<Vec<Record>> {
        Ok(self.cache.read(ctx, collection, filter_branch).await?)
    }

    /// A single live record visible to the caller.
    pub async fn get(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        id: &RecordId,
    ) -> EngineResult<Option<Record>> {
        Ok(self.access.scoped_get(ctx, collection, id).await?)
    }

    /// Creates or updates a record. Durable locally before returning.
    pub async fn write(
        &self,
        ctx: &IdentityContext,
        operation: SyncOperation,
        record: Record,
    ) -> EngineResult<Record> {
        Ok(self.cache.write(ctx, operation, record).await?)
    }

    // ── Soft delete ─────────────────────────────────────────────

    pub async fn soft_delete(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        id: &RecordId,
        actor_id: &ActorId,
    ) -> EngineResult<Record> {
        self.load_for_caller(ctx, collection, id).await?;
        let record = self
            .soft_delete
            .soft_delete(collection, &ctx.tenant_id, id, actor_id)
            .await?;
        self.queue
            .enqueue(&ctx.tenant_id, SyncOperation::Delete, collection, id, record.clone())
            .await?;
        Ok(record)
    }

    pub async fn restore(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        id: &RecordId,
    ) -> EngineResult<Record> {
        self.load_for_caller(ctx, collection, id).await?;
        let record = self.soft_delete.restore(collection, &ctx.tenant_id, id).await?;
        self.queue
            .enqueue(&ctx.tenant_id, SyncOperation::Update, collection, id, record.clone())
            .await?;
        Ok(record)
    }

    /// Restores every record of the tenant deleted within `[start, end]`.
    /// Owner only.
    pub async fn restore_by_time_range(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        start: Timestamp,
        end: Timestamp,
    ) -> EngineResult<RestoreReport> {
        BranchFilter::require_owner(ctx, "restore by time range")?;
        let report = self
            .soft_delete
            .restore_by_time_range(collection, &ctx.tenant_id, start, end)
            .await?;
        for record in &report.restored {
            self.queue
                .enqueue(
                    &ctx.tenant_id,
                    SyncOperation::Update,
                    collection,
                    &record.id,
                    record.clone(),
                )
                .await?;
        }
        info!(
            "Restored {} {} records in tenant {} ({} failed)",
            report.restored.len(),
            collection,
            ctx.tenant_id,
            report.failed.len()
        );
        Ok(report)
    }

    /// Soft-deleted records visible to the caller.
    pub async fn list_deleted(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
    ) -> EngineResult<Vec<Record>> {
        let deleted = self.soft_delete.list_deleted(collection, &ctx.tenant_id).await?;
        Ok(BranchFilter::filter(ctx, None, deleted))
    }

    /// Physically removes a soft-deleted record from the local store.
    /// Owner only. The remote keeps its tombstone.
    pub async fn purge(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        id: &RecordId,
    ) -> EngineResult<()> {
        BranchFilter::require_owner(ctx, "purge")?;
        Ok(self.soft_delete.purge(collection, &ctx.tenant_id, id).await?)
    }

    // ── Sync ────────────────────────────────────────────────────

    /// Mutations of the caller's tenant not yet delivered.
    pub async fn pending_count(&self, ctx: &IdentityContext) -> EngineResult<usize> {
        Ok(self.queue.pending_count(&ctx.tenant_id).await?)
    }

    pub async fn drain(&self, ctx: &IdentityContext) -> EngineResult<DrainReport> {
        Ok(self.queue.drain(&ctx.tenant_id).await?)
    }

    /// Drains every tenant with buffered work, e.g. after connectivity returns.
    pub async fn drain_all(&self) -> EngineResult<Vec<(TenantId, DrainReport)>> {
        Ok(self.queue.drain_all().await?)
    }

    /// Owner only.
    pub async fn dead_letters(&self, ctx: &IdentityContext) -> EngineResult<Vec<DeadLetter>> {
        BranchFilter::require_owner(ctx, "list dead letters")?;
        Ok(self.queue.dead_letters(&ctx.tenant_id).await?)
    }

    /// Puts a dead-lettered mutation back at the tail of the queue under a
    /// new entry id, which is returned. Owner only.
    pub async fn requeue_dead_letter(
        &self,
        ctx: &IdentityContext,
        entry_id: EntryId,
    ) -> EngineResult<Option<EntryId>> {
        BranchFilter::require_owner(ctx, "requeue dead letter")?;
        Ok(self.queue.requeue_dead_letter(&ctx.tenant_id, entry_id).await?)
    }

    // ── Cache ───────────────────────────────────────────────────

    /// Refreshes the tenant's local copy of `collection` now.
    pub async fn refresh(&self, ctx: &IdentityContext, collection: Collection) -> EngineResult<usize> {
        if !ctx.role.is_known() {
            return Err(AccessError::PermissionDenied(format!(
                "unrecognised role in tenant {}",
                ctx.tenant_id
            ))
            .into());
        }
        Ok(self.cache.refresh(&ctx.tenant_id, collection).await?)
    }

    pub async fn invalidate(&self, ctx: &IdentityContext, collection: Collection) -> EngineResult<()> {
        Ok(self.cache.invalidate(&ctx.tenant_id, collection).await?)
    }

    // ── Backup ──────────────────────────────────────────────────

    /// Takes today's snapshot (at most one per day) and prunes snapshots past
    /// the retention window. Owner only.
    pub async fn daily_backup(&self, ctx: &IdentityContext) -> EngineResult<BackupReport> {
        BranchFilter::require_owner(ctx, "backup")?;
        let now = self.env.clock.now();
        let created = self.env.store.export_snapshot(&ctx.tenant_id, now).await?;
        let pruned = self
            .env
            .store
            .prune_snapshots(&ctx.tenant_id, self.config.backup_retention_days, now)
            .await?;
        match &created {
            Some(info) => info!(
                "Snapshot {} for tenant {}: {} records",
                info.date, ctx.tenant_id, info.record_count
            ),
            None => debug!("Snapshot for tenant {} already taken today", ctx.tenant_id),
        }
        Ok(BackupReport { created, pruned })
    }

    /// Owner only. Newest first.
    pub async fn list_snapshots(&self, ctx: &IdentityContext) -> EngineResult<Vec<SnapshotInfo>> {
        BranchFilter::require_owner(ctx, "list snapshots")?;
        Ok(self.env.store.list_snapshots(&ctx.tenant_id).await?)
    }

    /// Owner only.
    pub async fn load_snapshot(
        &self,
        ctx: &IdentityContext,
        date: NaiveDate,
    ) -> EngineResult<Option<Snapshot>> {
        BranchFilter::require_owner(ctx, "load snapshot")?;
        Ok(self.env.store.load_snapshot(&ctx.tenant_id, date).await?)
    }

    /// The stored record (deleted or not) if the caller may modify it.
    async fn load_for_caller(
        &self,
        ctx: &IdentityContext,
        collection: Collection,
        id: &RecordId,
    ) -> EngineResult<Record> {
        let scope = BranchFilter::read_scope(ctx, None);
        if scope == ReadScope::Denied {
            return Err(AccessError::PermissionDenied(format!(
                "caller may not modify {collection}/{id}"
            ))
            .into());
        }
        let key = RecordKey::new(ctx.tenant_id.clone(), id.clone());
        match self.env.store.get(collection, &key).await? {
            Some(record) if BranchFilter::is_visible(&scope, &record) => Ok(record),
            _ => Err(AccessError::NotFound {
                collection,
                id: id.clone(),
            }
            .into()),
        }
    }
}
