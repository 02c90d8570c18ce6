//! The durable sync queue.
//!
//! Local mutations are appended to the store-backed queue before `enqueue`
//! returns, then delivered to the remote target one entry at a time in
//! per-tenant FIFO order:
//!
//! ```text
//! Pending ──mark──▶ InFlight ──ack──▶ (removed)
//!    ▲                 │
//!    └──── failure ────┤ attempts + 1 < max
//!                      └──▶ dead letters (attempts == max)
//! ```
//!
//! A drain stops at the first failed delivery and the next drain resumes
//! from that same entry. Overlapping drains of one tenant coalesce: inside
//! the process through a drain slot, across processes through the store's
//! drain lease.

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{PushEntry, PushRequest};
use crate::transport::SyncTarget;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tillsync_store::{EmbeddedStore, FailureOutcome};
use tillsync_types::{
    Clock, Collection, DeadLetter, EntryId, Record, RecordId, SyncOperation, SyncQueueEntry,
    TenantId,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a drain pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStop {
    /// The tenant's queue is empty.
    Drained,
    /// Connectivity was lost (or absent).
    Offline,
    /// A delivery failed; the entry stays at the head (or was dead-lettered).
    Failed { entry_id: EntryId, error: String },
    /// Another process holds the tenant's drain lease.
    LeaseHeld,
    /// A drain of this tenant was already running here; it will run once more.
    Coalesced,
}

/// Summary of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: Vec<EntryId>,
    pub dead_lettered: Vec<EntryId>,
    pub stop: DrainStop,
}

impl DrainReport {
    fn new(stop: DrainStop) -> Self {
        Self {
            delivered: Vec::new(),
            dead_lettered: Vec::new(),
            stop,
        }
    }
}

#[derive(Debug, Default)]
struct DrainSlot {
    rerun: bool,
}

struct Inner {
    store: EmbeddedStore,
    target: Arc<dyn SyncTarget>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    /// Identifies this queue as a lease holder.
    holder: String,
    slots: Mutex<HashMap<TenantId, DrainSlot>>,
}

/// A claimed drain slot. Dropping it frees the slot, so a drain that errors
/// or is cancelled mid-pass never blocks later drains of the tenant.
struct SlotGuard<'a> {
    queue: &'a SyncQueue,
    tenant_id: &'a TenantId,
    released: bool,
}

impl SlotGuard<'_> {
    /// Returns `true` when another pass was requested while this one ran;
    /// otherwise frees the slot.
    fn finish_or_rerun(&mut self) -> bool {
        let mut slots = self.queue.lock_slots();
        match slots.get_mut(self.tenant_id) {
            Some(slot) if slot.rerun => {
                slot.rerun = false;
                true
            }
            _ => {
                slots.remove(self.tenant_id);
                self.released = true;
                false
            }
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.queue.lock_slots().remove(self.tenant_id);
        }
    }
}

/// Handle to the durable sync queue. Cloning shares the queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("holder", &self.inner.holder)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SyncQueue {
    pub fn new(
        store: EmbeddedStore,
        target: Arc<dyn SyncTarget>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                target,
                connectivity,
                clock,
                config,
                holder: Uuid::new_v4().to_string(),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Durably buffers a mutation and returns the id of the entry carrying it.
    ///
    /// When online and `auto_drain` is set, a drain of the tenant is started
    /// in the background; its outcome never affects this call.
    pub async fn enqueue(
        &self,
        tenant_id: &TenantId,
        operation: SyncOperation,
        collection: Collection,
        record_id: &RecordId,
        payload: Record,
    ) -> SyncResult<EntryId> {
        let entry = SyncQueueEntry::new(
            tenant_id.clone(),
            operation,
            collection,
            record_id.clone(),
            payload,
            self.inner.clock.now(),
        );
        let outcome = self.inner.store.queue_append(entry).await?;
        debug!("Enqueued {} {}/{} as {:?}", operation, collection, record_id, outcome);

        if self.inner.config.auto_drain && self.inner.connectivity.is_online() {
            self.spawn_drain(tenant_id.clone());
        }
        Ok(outcome.entry_id())
    }

    /// Starts a background drain of `tenant_id` if a tokio runtime is available.
    pub fn spawn_drain(&self, tenant_id: TenantId) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime; drain of tenant {} deferred", tenant_id);
            return;
        };
        let queue = self.clone();
        handle.spawn(async move {
            if let Err(e) = queue.drain(&tenant_id).await {
                warn!("Background drain of tenant {} failed: {}", tenant_id, e);
            }
        });
    }

    /// Delivers the tenant's queue in order until it is empty, connectivity
    /// drops, or a delivery fails.
    ///
    /// Returns [`DrainStop::Coalesced`] immediately when a drain of the same
    /// tenant is already running in this process; that drain makes one more
    /// pass before finishing.
    pub async fn drain(&self, tenant_id: &TenantId) -> SyncResult<DrainReport> {
        let Some(mut slot) = self.claim_slot(tenant_id) else {
            debug!("Drain of tenant {} already running; coalesced", tenant_id);
            return Ok(DrainReport::new(DrainStop::Coalesced));
        };

        let mut total = DrainReport::new(DrainStop::Drained);
        loop {
            let pass = self.drain_pass(tenant_id).await?;
            total.delivered.extend(pass.delivered);
            total.dead_lettered.extend(pass.dead_lettered);
            total.stop = pass.stop;

            if !slot.finish_or_rerun() {
                break;
            }
        }

        info!(
            "Drained tenant {}: {} delivered, {} dead-lettered, stop: {:?}",
            tenant_id,
            total.delivered.len(),
            total.dead_lettered.len(),
            total.stop
        );
        Ok(total)
    }

    /// Drains every tenant with queued entries.
    ///
    /// A tenant whose drain errors is logged and skipped; the others are
    /// still drained and reported.
    pub async fn drain_all(&self) -> SyncResult<Vec<(TenantId, DrainReport)>> {
        let mut reports = Vec::new();
        for tenant_id in self.inner.store.queue_tenants().await? {
            match self.drain(&tenant_id).await {
                Ok(report) => reports.push((tenant_id, report)),
                Err(e) => warn!("Drain of tenant {} failed, moving on: {}", tenant_id, e),
            }
        }
        Ok(reports)
    }

    /// Entries awaiting delivery for the tenant.
    pub async fn pending_count(&self, tenant_id: &TenantId) -> SyncResult<usize> {
        Ok(self.inner.store.queue_len(tenant_id).await?)
    }

    /// The tenant's queued entries, oldest first.
    pub async fn entries(&self, tenant_id: &TenantId) -> SyncResult<Vec<SyncQueueEntry>> {
        Ok(self.inner.store.queue_entries(tenant_id).await?)
    }

    pub async fn dead_letters(&self, tenant_id: &TenantId) -> SyncResult<Vec<DeadLetter>> {
        Ok(self.inner.store.dead_letters(tenant_id).await?)
    }

    /// Moves a dead-lettered entry back to the tail of the queue with a
    /// fresh attempt budget, under a new entry id.
    ///
    /// Returns the new id, or `None` when no such dead letter is waiting.
    pub async fn requeue_dead_letter(
        &self,
        tenant_id: &TenantId,
        entry_id: EntryId,
    ) -> SyncResult<Option<EntryId>> {
        let requeued = self
            .inner
            .store
            .requeue_dead_letter(tenant_id, entry_id, self.inner.clock.now())
            .await?;
        if let Some(new_id) = requeued {
            info!("Requeued dead letter {} for tenant {} as {}", entry_id, tenant_id, new_id);
            if self.inner.config.auto_drain && self.inner.connectivity.is_online() {
                self.spawn_drain(tenant_id.clone());
            }
        }
        Ok(requeued)
    }

    // ── Drain internals ──────────────────────────────────────────

    fn claim_slot<'a>(&'a self, tenant_id: &'a TenantId) -> Option<SlotGuard<'a>> {
        let mut slots = self.lock_slots();
        match slots.get_mut(tenant_id) {
            Some(slot) => {
                slot.rerun = true;
                None
            }
            None => {
                slots.insert(tenant_id.clone(), DrainSlot::default());
                Some(SlotGuard {
                    queue: self,
                    tenant_id,
                    released: false,
                })
            }
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<TenantId, DrainSlot>> {
        // The map holds no invariants a panicking holder could break.
        self.inner
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn drain_pass(&self, tenant_id: &TenantId) -> SyncResult<DrainReport> {
        if !self.inner.connectivity.is_online() {
            return Ok(DrainReport::new(DrainStop::Offline));
        }
        if !self.renew_lease(tenant_id).await? {
            debug!("Drain lease for tenant {} held elsewhere", tenant_id);
            return Ok(DrainReport::new(DrainStop::LeaseHeld));
        }

        let result = self.deliver_in_order(tenant_id).await;
        if let Err(e) = self
            .inner
            .store
            .release_lease(tenant_id, &self.inner.holder)
            .await
        {
            warn!("Failed to release drain lease for tenant {}: {}", tenant_id, e);
        }
        result
    }

    async fn deliver_in_order(&self, tenant_id: &TenantId) -> SyncResult<DrainReport> {
        let store = &self.inner.store;
        let recovered = store.queue_recover_in_flight(tenant_id).await?;
        if recovered > 0 {
            info!("Recovered {} in-flight entries for tenant {}", recovered, tenant_id);
        }

        let mut report = DrainReport::new(DrainStop::Drained);
        loop {
            if !self.inner.connectivity.is_online() {
                report.stop = DrainStop::Offline;
                break;
            }
            let Some(entry) = store.queue_head(tenant_id).await? else {
                report.stop = DrainStop::Drained;
                break;
            };
            if !self.renew_lease(tenant_id).await? {
                report.stop = DrainStop::LeaseHeld;
                break;
            }

            let entry_id = entry.entry_id;
            store.queue_mark_in_flight(entry_id).await?;
            match self.deliver(&entry).await {
                Ok(()) => {
                    store.queue_acknowledge(entry_id).await?;
                    debug!("Delivered {} ({}/{})", entry_id, entry.collection, entry.record_id);
                    report.delivered.push(entry_id);
                }
                Err(e) => {
                    let error = e.to_string();
                    let outcome = store
                        .queue_record_failure(
                            entry_id,
                            &error,
                            self.inner.config.max_attempts,
                            self.inner.clock.now(),
                        )
                        .await?;
                    match outcome {
                        FailureOutcome::DeadLettered { attempts } => {
                            warn!(
                                "Entry {} dead-lettered after {} attempts: {}",
                                entry_id, attempts, error
                            );
                            report.dead_lettered.push(entry_id);
                        }
                        FailureOutcome::Retry { attempts } => {
                            warn!("Delivery of {} failed (attempt {}): {}", entry_id, attempts, error);
                        }
                        FailureOutcome::Missing => {}
                    }
                    report.stop = DrainStop::Failed { entry_id, error };
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn deliver(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        let request = PushRequest {
            tenant_id: entry.tenant_id.clone(),
            entries: vec![PushEntry::from(entry)],
        };
        let response = self.inner.target.push(request).await?;
        if response.is_accepted(entry.entry_id) {
            return Ok(());
        }
        let reason = response
            .rejection(entry.entry_id)
            .unwrap_or("not acknowledged")
            .to_string();
        Err(SyncError::DeliveryFailed {
            entry_id: entry.entry_id,
            reason,
        })
    }

    async fn renew_lease(&self, tenant_id: &TenantId) -> SyncResult<bool> {
        Ok(self
            .inner
            .store
            .try_acquire_lease(
                tenant_id,
                &self.inner.holder,
                self.inner.clock.now(),
                self.inner.config.lease_ttl_ms,
            )
            .await?)
    }
}
