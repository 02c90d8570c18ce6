//! Ordered schema migrations.
//!
//! The stored schema version lives in SQLite's `user_version` header field.
//! Each step runs in its own `BEGIN IMMEDIATE` transaction and re-reads the
//! version after taking the write lock, so two processes opening the same
//! file at once apply every step exactly once. Steps only add tables,
//! columns and indexes; existing rows are never rewritten.

use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tillsync_types::Collection;
use tracing::{info, warn};

/// Schema version this build writes.
pub const SCHEMA_VERSION: u32 = 6;

/// One versioned schema step.
pub struct Migration {
    /// Version the store is at after this step.
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish()
    }
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "inventory, sales and customers collections",
        apply: initial_collections,
    },
    Migration {
        version: 2,
        description: "suppliers and expenses collections",
        apply: supplier_and_expense_collections,
    },
    Migration {
        version: 3,
        description: "tenant+branch secondary indexes",
        apply: branch_indexes,
    },
    Migration {
        version: 4,
        description: "sync queue, dead letters, refresh metadata and drain leases",
        apply: sync_tables,
    },
    Migration {
        version: 5,
        description: "backup snapshots",
        apply: snapshot_table,
    },
    Migration {
        version: 6,
        description: "sync queue delivery-attempt marker",
        apply: queue_sent_marker,
    },
];

fn initial_collections(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    for c in [Collection::Inventory, Collection::Sales, Collection::Customers] {
        create_collection(tx, c)?;
    }
    Ok(())
}

fn supplier_and_expense_collections(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    for c in [Collection::Suppliers, Collection::Expenses] {
        create_collection(tx, c)?;
    }
    Ok(())
}

fn branch_indexes(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    for c in Collection::ALL {
        let table = c.as_str();
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_by_tenant_branch ON {table} (tenant_id, branch_id);"
        ))?;
    }
    Ok(())
}

fn sync_tables(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT NOT NULL UNIQUE,
            tenant_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS sync_queue_by_tenant ON sync_queue (tenant_id, seq);

        CREATE TABLE IF NOT EXISTS dead_letters (
            entry_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            entry TEXT NOT NULL,
            dead_lettered_at INTEGER NOT NULL,
            requeued_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS dead_letters_by_tenant ON dead_letters (tenant_id);

        CREATE TABLE IF NOT EXISTS refresh_meta (
            tenant_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            refreshed_at INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, collection)
        );

        CREATE TABLE IF NOT EXISTS drain_leases (
            tenant_id TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        ",
    )
}

fn snapshot_table(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            tenant_id TEXT NOT NULL,
            date TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            records TEXT NOT NULL,
            PRIMARY KEY (tenant_id, date)
        );
        ",
    )
}

/// Entries that ever reached the transport are never coalesced into again.
fn queue_sent_marker(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch("ALTER TABLE sync_queue ADD COLUMN sent INTEGER NOT NULL DEFAULT 0;")
}

fn create_collection(tx: &Transaction<'_>, collection: Collection) -> rusqlite::Result<()> {
    let table = collection.as_str();
    tx.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            tenant_id TEXT NOT NULL,
            id TEXT NOT NULL,
            branch_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            data TEXT NOT NULL,
            PRIMARY KEY (tenant_id, id)
        );
        CREATE INDEX IF NOT EXISTS {table}_by_tenant ON {table} (tenant_id);
        "
    ))
}

/// What a migration run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

/// Reads the stored schema version.
pub fn schema_version(conn: &Connection) -> StoreResult<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version as u32)
}

/// Applies every migration above the stored version up to `target`.
///
/// Never lowers the version: a store already past `target` is left alone.
pub fn migrate(conn: &mut Connection, target: u32) -> StoreResult<MigrationReport> {
    let from_version = schema_version(conn)?;
    if from_version > target {
        warn!(
            "store schema version {} is newer than this build's target {}; leaving it untouched",
            from_version, target
        );
        return Ok(MigrationReport {
            from_version,
            to_version: from_version,
            applied: Vec::new(),
        });
    }

    let mut applied = Vec::new();
    for step in MIGRATIONS.iter().filter(|m| m.version <= target) {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = schema_version(&tx)?;
        if current >= step.version {
            tx.commit()?;
            continue;
        }
        if current + 1 != step.version {
            return Err(StoreError::Migration(format!(
                "cannot apply step {} to a store at version {}",
                step.version, current
            )));
        }
        (step.apply)(&tx).map_err(|e| {
            StoreError::Migration(format!("step {} ({}) failed: {e}", step.version, step.description))
        })?;
        tx.pragma_update(None, "user_version", step.version)?;
        tx.commit()?;
        info!("Applied schema migration {}: {}", step.version, step.description);
        applied.push(step.version);
    }

    Ok(MigrationReport {
        from_version,
        to_version: schema_version(conn)?,
        applied,
    })
}
