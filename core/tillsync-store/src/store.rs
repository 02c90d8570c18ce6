//! The embedded store adapter.
//!
//! One table per collection keyed by `(tenant_id, id)`. The full record is
//! kept as JSON in `data`; the envelope fields the indexes need are copied
//! into real columns on every write, inside the same statement.

use crate::error::{StoreError, StoreResult};
use crate::migration::{self, MigrationReport, SCHEMA_VERSION};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tillsync_types::{BranchId, Collection, Record, RecordKey, TenantId};
use tracing::{debug, info, warn};

/// How long a connection waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A tenant-scoped secondary index lookup.
///
/// Every variant carries a tenant: there is no way to enumerate a collection
/// across tenants through the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// `by_tenant`: all of the tenant's records.
    Tenant(TenantId),
    /// `by_tenant_branch`: the tenant's records for one branch.
    TenantBranch(TenantId, BranchId),
}

impl IndexQuery {
    /// Name of the declared index serving this query.
    #[must_use]
    pub const fn index_name(&self) -> &'static str {
        match self {
            IndexQuery::Tenant(_) => "by_tenant",
            IndexQuery::TenantBranch(..) => "by_tenant_branch",
        }
    }

    /// The tenant the query is confined to.
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            IndexQuery::Tenant(t) | IndexQuery::TenantBranch(t, _) => t,
        }
    }

    fn matches(&self, record: &Record) -> bool {
        match self {
            IndexQuery::Tenant(t) => record.tenant_id.as_ref() == Some(t),
            IndexQuery::TenantBranch(t, b) => {
                record.tenant_id.as_ref() == Some(t) && record.branch_id.as_ref() == Some(b)
            }
        }
    }
}

/// Handle to the local SQLite store.
///
/// Cloning shares the underlying connection. Separate processes (or tabs)
/// open their own handle on the same file.
#[derive(Clone)]
pub struct EmbeddedStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedStore").field("path", &self.path).finish()
    }
}

impl EmbeddedStore {
    /// Opens (or creates) the store at `path` and migrates it to [`SCHEMA_VERSION`].
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_target(path, SCHEMA_VERSION).await
    }

    /// Opens the store migrating only up to `target_version`.
    ///
    /// Lets tests and tooling observe a store mid-migration.
    pub async fn open_with_target(path: impl AsRef<Path>, target_version: u32) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            let mut conn = Connection::open(&open_path).map_err(|e| {
                StoreError::Unavailable(format!("failed to open {}: {e}", open_path.display()))
            })?;
            configure(&conn)?;
            let report = migration::migrate(&mut conn, target_version)?;
            log_migration(&report);
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        info!("Opened store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Opens an in-memory store (for testing).
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = tokio::task::spawn_blocking(|| -> StoreResult<Connection> {
            let mut conn = Connection::open_in_memory()
                .map_err(|e| StoreError::Unavailable(format!("failed to open in-memory store: {e}")))?;
            configure(&conn)?;
            migration::migrate(&mut conn, SCHEMA_VERSION)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// The file backing this store, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current stored schema version.
    pub async fn schema_version(&self) -> StoreResult<u32> {
        self.with_conn(|conn| migration::schema_version(conn)).await
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("store connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // ── Records ──────────────────────────────────────────────────

    /// Upserts a record keyed by `[tenant_id, id]`.
    pub async fn put(&self, collection: Collection, record: Record) -> StoreResult<()> {
        validate(collection, &record)?;
        self.with_conn(move |conn| {
            require_table(conn, collection)?;
            upsert(conn, collection, &record)?;
            debug!("Put {}/{}", collection, record.id);
            Ok(())
        })
        .await
    }

    /// Point lookup. Absence is not an error.
    pub async fn get(&self, collection: Collection, key: &RecordKey) -> StoreResult<Option<Record>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            if !table_exists(conn, collection)? {
                return Ok(None);
            }
            let data: Option<String> = conn
                .query_row(
                    &format!("SELECT data FROM {} WHERE tenant_id = ?1 AND id = ?2", collection.as_str()),
                    params![key.tenant_id.as_str(), key.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(|d| decode(&d)).transpose()
        })
        .await
    }

    /// Tenant-scoped listing through a secondary index.
    ///
    /// Soft-deleted records are excluded unless `include_deleted` is set. When
    /// the SQL index is missing (store mid-migration) the whole table is
    /// scanned and filtered instead.
    pub async fn get_all_by_index(
        &self,
        collection: Collection,
        query: &IndexQuery,
        include_deleted: bool,
    ) -> StoreResult<Vec<Record>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            if !table_exists(conn, collection)? {
                return Ok(Vec::new());
            }
            let index = format!("{}_{}", collection.as_str(), query.index_name());
            if index_exists(conn, &index)? {
                indexed_lookup(conn, collection, &query, include_deleted)
            } else {
                warn!(
                    "Index {} missing, falling back to a full scan of {}",
                    index, collection
                );
                scan_lookup(conn, collection, &query, include_deleted)
            }
        })
        .await
    }

    /// Physically removes a record. Only the purge path calls this.
    pub async fn delete_hard(&self, collection: Collection, key: &RecordKey) -> StoreResult<bool> {
        let key = key.clone();
        self.with_conn(move |conn| {
            if !table_exists(conn, collection)? {
                return Ok(false);
            }
            let removed = conn.execute(
                &format!("DELETE FROM {} WHERE tenant_id = ?1 AND id = ?2", collection.as_str()),
                params![key.tenant_id.as_str(), key.id.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Atomically replaces the tenant's full set in one collection.
    ///
    /// Runs as a single `BEGIN IMMEDIATE` transaction: readers see either the
    /// old set or the new one, and a crash leaves the old set intact.
    pub async fn replace_all(
        &self,
        collection: Collection,
        tenant_id: &TenantId,
        records: Vec<Record>,
    ) -> StoreResult<usize> {
        for record in &records {
            validate(collection, record)?;
            if record.tenant_id.as_ref() != Some(tenant_id) {
                return Err(StoreError::InvalidRecord(format!(
                    "record {} does not belong to tenant {}",
                    record.id, tenant_id
                )));
            }
        }
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            require_table(conn, collection)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let cleared = tx.execute(
                &format!("DELETE FROM {} WHERE tenant_id = ?1", collection.as_str()),
                params![tenant_id.as_str()],
            )?;
            for record in &records {
                upsert(&tx, collection, record)?;
            }
            tx.commit()?;
            debug!(
                "Replaced {} {} records with {} for tenant {}",
                cleared,
                collection,
                records.len(),
                tenant_id
            );
            Ok(records.len())
        })
        .await
    }
}

fn configure(conn: &Connection) -> StoreResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    Ok(())
}

fn log_migration(report: &MigrationReport) {
    if !report.applied.is_empty() {
        info!(
            "Migrated store from version {} to {}",
            report.from_version, report.to_version
        );
    }
}

fn validate(collection: Collection, record: &Record) -> StoreResult<()> {
    let found = record.collection();
    if found != collection {
        return Err(StoreError::SchemaMismatch { collection, found });
    }
    if record.tenant_id.is_none() {
        return Err(StoreError::InvalidRecord(format!(
            "record {} has no tenant",
            record.id
        )));
    }
    Ok(())
}

pub(crate) fn decode(data: &str) -> StoreResult<Record> {
    Ok(serde_json::from_str(data)?)
}

fn upsert(conn: &Connection, collection: Collection, record: &Record) -> StoreResult<()> {
    let tenant = record
        .tenant_id
        .as_ref()
        .ok_or_else(|| StoreError::InvalidRecord(format!("record {} has no tenant", record.id)))?;
    let data = serde_json::to_string(record)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (tenant_id, id, branch_id, created_at, updated_at, deleted_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                branch_id = excluded.branch_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at,
                data = excluded.data",
            collection.as_str()
        ),
        params![
            tenant.as_str(),
            record.id.as_str(),
            record.branch_id.as_ref().map(|b| b.as_str()),
            record.created_at.as_millis(),
            record.updated_at.as_millis(),
            record.deleted_at.map(|t| t.as_millis()),
            data,
        ],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, collection: Collection) -> StoreResult<bool> {
    sqlite_object_exists(conn, "table", collection.as_str())
}

fn index_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    sqlite_object_exists(conn, "index", name)
}

fn sqlite_object_exists(conn: &Connection, kind: &str, name: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
            params![kind, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn require_table(conn: &Connection, collection: Collection) -> StoreResult<()> {
    if table_exists(conn, collection)? {
        Ok(())
    } else {
        Err(StoreError::Migration(format!(
            "collection {collection} does not exist at the current schema version"
        )))
    }
}

fn indexed_lookup(
    conn: &Connection,
    collection: Collection,
    query: &IndexQuery,
    include_deleted: bool,
) -> StoreResult<Vec<Record>> {
    let deleted_clause = if include_deleted { "" } else { " AND deleted_at IS NULL" };
    let table = collection.as_str();
    let rows: Vec<String> = match query {
        IndexQuery::Tenant(tenant) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT data FROM {table} WHERE tenant_id = ?1{deleted_clause} ORDER BY created_at, id"
            ))?;
            stmt.query_map(params![tenant.as_str()], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        }
        IndexQuery::TenantBranch(tenant, branch) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT data FROM {table} WHERE tenant_id = ?1 AND branch_id = ?2{deleted_clause} ORDER BY created_at, id"
            ))?;
            stmt.query_map(params![tenant.as_str(), branch.as_str()], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        }
    };
    rows.iter().map(|d| decode(d)).collect()
}

fn scan_lookup(
    conn: &Connection,
    collection: Collection,
    query: &IndexQuery,
    include_deleted: bool,
) -> StoreResult<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT data FROM {} ORDER BY created_at, id",
        collection.as_str()
    ))?;
    let rows: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut result = Vec::new();
    for data in rows {
        let record = decode(&data)?;
        if query.matches(&record) && (include_deleted || !record.is_deleted()) {
            result.push(record);
        }
    }
    Ok(result)
}
