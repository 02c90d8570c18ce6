//! Persistence for the durable sync queue and its dead-letter collection.
//!
//! The queue is ordered by an autoincrement `seq`, giving per-tenant FIFO.
//! Every state change runs in a `BEGIN IMMEDIATE` transaction so concurrent
//! processes never interleave half-applied transitions.

use crate::error::{StoreError, StoreResult};
use crate::store::EmbeddedStore;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tillsync_types::{
    DeadLetter, EntryId, EntryState, RecordId, SyncQueueEntry, TenantId, Timestamp,
};
use tracing::debug;

/// What `queue_append` did with a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored as a new tail entry.
    Appended(EntryId),
    /// Folded into the existing tail entry for the same record.
    Coalesced(EntryId),
}

impl AppendOutcome {
    /// The id of the entry now representing the mutation.
    #[must_use]
    pub const fn entry_id(&self) -> EntryId {
        match self {
            AppendOutcome::Appended(id) | AppendOutcome::Coalesced(id) => *id,
        }
    }
}

/// Result of recording a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending; will be retried.
    Retry { attempts: u32 },
    /// Attempts exhausted; moved to the dead-letter collection.
    DeadLettered { attempts: u32 },
    /// The entry was no longer queued.
    Missing,
}

const ENTRY_COLUMNS: &str =
    "entry_id, tenant_id, operation, collection, record_id, payload, enqueued_at, attempts, state, last_error";

impl EmbeddedStore {
    // ── Queue ────────────────────────────────────────────────────

    /// Durably appends an entry, coalescing it into the tenant's tail entry
    /// when that tail targets the same record and was never handed to the
    /// transport. Recovery from in-flight does not clear that marker.
    pub async fn queue_append(&self, entry: SyncQueueEntry) -> StoreResult<AppendOutcome> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let tail = tx
                .query_row(
                    &format!(
                        "SELECT {ENTRY_COLUMNS}, sent FROM sync_queue WHERE tenant_id = ?1 ORDER BY seq DESC LIMIT 1"
                    ),
                    params![entry.tenant_id.as_str()],
                    |row| Ok((read_entry_row(row)?, row.get::<_, bool>(10)?)),
                )
                .optional()?
                .map(|(row, sent)| row.into_entry().map(|tail| (tail, sent)))
                .transpose()?;

            let outcome = match tail {
                Some((tail, false))
                    if tail.state == EntryState::Pending
                        && tail.attempts == 0
                        && tail.collection == entry.collection
                        && tail.record_id == entry.record_id =>
                {
                    let operation = tail.operation.coalesce(entry.operation);
                    tx.execute(
                        "UPDATE sync_queue SET operation = ?1, payload = ?2, enqueued_at = ?3 WHERE entry_id = ?4",
                        params![
                            operation.as_str(),
                            serde_json::to_string(&entry.payload)?,
                            entry.enqueued_at.as_millis(),
                            tail.entry_id.to_string(),
                        ],
                    )?;
                    AppendOutcome::Coalesced(tail.entry_id)
                }
                _ => {
                    insert_entry(&tx, &entry)?;
                    AppendOutcome::Appended(entry.entry_id)
                }
            };
            tx.commit()?;
            debug!("Queue append for {}/{}: {:?}", entry.collection, entry.record_id, outcome);
            Ok(outcome)
        })
        .await
    }

    /// The tenant's queue, oldest first.
    pub async fn queue_entries(&self, tenant_id: &TenantId) -> StoreResult<Vec<SyncQueueEntry>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE tenant_id = ?1 ORDER BY seq"
            ))?;
            let rows: Vec<EntryRow> = stmt
                .query_map(params![tenant_id.as_str()], read_entry_row)?
                .collect::<Result<_, _>>()?;
            rows.into_iter().map(EntryRow::into_entry).collect()
        })
        .await
    }

    /// The tenant's oldest entry, whatever its state.
    pub async fn queue_head(&self, tenant_id: &TenantId) -> StoreResult<Option<SyncQueueEntry>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE tenant_id = ?1 ORDER BY seq LIMIT 1"
                ),
                params![tenant_id.as_str()],
                read_entry_row,
            )
            .optional()?
            .map(EntryRow::into_entry)
            .transpose()
        })
        .await
    }

    /// Number of entries awaiting delivery for the tenant.
    pub async fn queue_len(&self, tenant_id: &TenantId) -> StoreResult<usize> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE tenant_id = ?1",
                params![tenant_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Tenants that currently have queued entries.
    pub async fn queue_tenants(&self) -> StoreResult<Vec<TenantId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT tenant_id FROM sync_queue ORDER BY tenant_id")?;
            let rows: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            Ok(rows.into_iter().map(TenantId::new).collect())
        })
        .await
    }

    /// Marks an entry as handed to the transport.
    pub async fn queue_mark_in_flight(&self, entry_id: EntryId) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE sync_queue SET state = ?1, sent = 1 WHERE entry_id = ?2",
                params![EntryState::InFlight.as_str(), entry_id.to_string()],
            )?;
            Ok(n > 0)
        })
        .await
    }

    /// Removes an acknowledged entry.
    pub async fn queue_acknowledge(&self, entry_id: EntryId) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM sync_queue WHERE entry_id = ?1",
                params![entry_id.to_string()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Reverts every in-flight entry of the tenant to pending.
    ///
    /// Called by a drainer that holds the tenant's lease: anything still in
    /// flight was left behind by a drainer that died mid-delivery.
    pub async fn queue_recover_in_flight(&self, tenant_id: &TenantId) -> StoreResult<usize> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE sync_queue SET state = ?1 WHERE tenant_id = ?2 AND state = ?3",
                params![
                    EntryState::Pending.as_str(),
                    tenant_id.as_str(),
                    EntryState::InFlight.as_str()
                ],
            )?;
            Ok(n)
        })
        .await
    }

    /// Counts a failed delivery; dead-letters the entry once `max_attempts` is reached.
    pub async fn queue_record_failure(
        &self,
        entry_id: EntryId,
        error: &str,
        max_attempts: u32,
        now: Timestamp,
    ) -> StoreResult<FailureOutcome> {
        let error = error.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut entry) = tx
                .query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE entry_id = ?1"),
                    params![entry_id.to_string()],
                    read_entry_row,
                )
                .optional()?
                .map(EntryRow::into_entry)
                .transpose()?
            else {
                return Ok(FailureOutcome::Missing);
            };

            entry.attempts += 1;
            entry.last_error = Some(error);
            entry.state = EntryState::Pending;

            let outcome = if entry.attempts >= max_attempts {
                tx.execute(
                    "INSERT OR REPLACE INTO dead_letters (entry_id, tenant_id, entry, dead_lettered_at, requeued_at)
                     VALUES (?1, ?2, ?3, ?4, NULL)",
                    params![
                        entry.entry_id.to_string(),
                        entry.tenant_id.as_str(),
                        serde_json::to_string(&entry)?,
                        now.as_millis(),
                    ],
                )?;
                tx.execute(
                    "DELETE FROM sync_queue WHERE entry_id = ?1",
                    params![entry.entry_id.to_string()],
                )?;
                FailureOutcome::DeadLettered {
                    attempts: entry.attempts,
                }
            } else {
                tx.execute(
                    "UPDATE sync_queue SET attempts = ?1, last_error = ?2, state = ?3 WHERE entry_id = ?4",
                    params![
                        entry.attempts,
                        entry.last_error,
                        entry.state.as_str(),
                        entry.entry_id.to_string(),
                    ],
                )?;
                FailureOutcome::Retry {
                    attempts: entry.attempts,
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    // ── Dead letters ─────────────────────────────────────────────

    /// Dead-lettered entries of the tenant that have not been requeued.
    pub async fn dead_letters(&self, tenant_id: &TenantId) -> StoreResult<Vec<DeadLetter>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entry, dead_lettered_at FROM dead_letters
                 WHERE tenant_id = ?1 AND requeued_at IS NULL
                 ORDER BY dead_lettered_at, entry_id",
            )?;
            let rows: Vec<(String, i64)> = stmt
                .query_map(params![tenant_id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?;
            rows.into_iter()
                .map(|(entry, at)| {
                    Ok(DeadLetter {
                        entry: serde_json::from_str(&entry)?,
                        dead_lettered_at: Timestamp::from_millis(at),
                    })
                })
                .collect()
        })
        .await
    }

    /// Puts a dead-lettered entry back at the tail of the queue with a fresh
    /// attempt budget. The dead-letter row is kept and stamped `requeued_at`.
    ///
    /// The requeued entry gets a new id: the remote may have recorded the old
    /// one as applied and would drop the redelivery as a duplicate. Returns the
    /// new id, or `None` when no unrequeued dead letter matched.
    pub async fn requeue_dead_letter(
        &self,
        tenant_id: &TenantId,
        entry_id: EntryId,
        now: Timestamp,
    ) -> StoreResult<Option<EntryId>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let entry: Option<String> = tx
                .query_row(
                    "SELECT entry FROM dead_letters
                     WHERE entry_id = ?1 AND tenant_id = ?2 AND requeued_at IS NULL",
                    params![entry_id.to_string(), tenant_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(entry) = entry else {
                return Ok(None);
            };
            let mut entry: SyncQueueEntry = serde_json::from_str(&entry)?;
            entry.entry_id = EntryId::new();
            entry.attempts = 0;
            entry.state = EntryState::Pending;
            entry.last_error = None;
            insert_entry(&tx, &entry)?;
            tx.execute(
                "UPDATE dead_letters SET requeued_at = ?1 WHERE entry_id = ?2",
                params![now.as_millis(), entry_id.to_string()],
            )?;
            tx.commit()?;
            debug!("Requeued dead letter {} as {}", entry_id, entry.entry_id);
            Ok(Some(entry.entry_id))
        })
        .await
    }
}

fn insert_entry(conn: &Connection, entry: &SyncQueueEntry) -> StoreResult<()> {
    conn.execute(
        &format!("INSERT INTO sync_queue ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            entry.entry_id.to_string(),
            entry.tenant_id.as_str(),
            entry.operation.as_str(),
            entry.collection.as_str(),
            entry.record_id.as_str(),
            serde_json::to_string(&entry.payload)?,
            entry.enqueued_at.as_millis(),
            entry.attempts,
            entry.state.as_str(),
            entry.last_error,
        ],
    )?;
    Ok(())
}

/// Raw column values; parsed outside the rusqlite row callback so parse
/// failures surface as store errors rather than SQLite errors.
struct EntryRow {
    entry_id: String,
    tenant_id: String,
    operation: String,
    collection: String,
    record_id: String,
    payload: String,
    enqueued_at: i64,
    attempts: u32,
    state: String,
    last_error: Option<String>,
}

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        entry_id: row.get(0)?,
        tenant_id: row.get(1)?,
        operation: row.get(2)?,
        collection: row.get(3)?,
        record_id: row.get(4)?,
        payload: row.get(5)?,
        enqueued_at: row.get(6)?,
        attempts: row.get(7)?,
        state: row.get(8)?,
        last_error: row.get(9)?,
    })
}

impl EntryRow {
    fn into_entry(self) -> StoreResult<SyncQueueEntry> {
        Ok(SyncQueueEntry {
            entry_id: self.entry_id.parse()?,
            tenant_id: TenantId::new(self.tenant_id),
            operation: self.operation.parse()?,
            collection: self.collection.parse()?,
            record_id: RecordId::new(self.record_id),
            payload: serde_json::from_str(&self.payload).map_err(StoreError::from)?,
            enqueued_at: Timestamp::from_millis(self.enqueued_at),
            attempts: self.attempts,
            state: self.state.parse()?,
            last_error: self.last_error,
        })
    }
}
