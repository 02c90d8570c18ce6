//! Daily per-tenant snapshots of every collection.
//!
//! A snapshot is a JSON export of the tenant's records (soft-deleted ones
//! included) keyed by the UTC date it was taken on. At most one snapshot
//! exists per tenant per day.

use crate::error::{StoreError, StoreResult};
use crate::store::{decode, EmbeddedStore};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tillsync_types::{Collection, Record, TenantId, Timestamp};
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A full export of one tenant's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub created_at: Timestamp,
    pub records: Vec<Record>,
}

/// Listing entry for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub date: NaiveDate,
    pub created_at: Timestamp,
    pub record_count: usize,
}

impl EmbeddedStore {
    /// Takes today's snapshot for the tenant if none exists yet.
    ///
    /// Returns `None` when a snapshot for `now`'s date is already stored.
    pub async fn export_snapshot(
        &self,
        tenant_id: &TenantId,
        now: Timestamp,
    ) -> StoreResult<Option<SnapshotInfo>> {
        let tenant_id = tenant_id.clone();
        let date = now.date_utc();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM snapshots WHERE tenant_id = ?1 AND date = ?2",
                    params![tenant_id.as_str(), date.format(DATE_FORMAT).to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(None);
            }

            let mut records = Vec::new();
            for collection in Collection::ALL {
                let mut stmt = tx.prepare(&format!(
                    "SELECT data FROM {} WHERE tenant_id = ?1 ORDER BY created_at, id",
                    collection.as_str()
                ))?;
                let rows: Vec<String> = stmt
                    .query_map(params![tenant_id.as_str()], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                for data in rows {
                    records.push(decode(&data)?);
                }
            }

            let record_count = records.len();
            tx.execute(
                "INSERT INTO snapshots (tenant_id, date, created_at, records) VALUES (?1, ?2, ?3, ?4)",
                params![
                    tenant_id.as_str(),
                    date.format(DATE_FORMAT).to_string(),
                    now.as_millis(),
                    serde_json::to_string(&records)?,
                ],
            )?;
            tx.commit()?;
            info!(
                "Exported snapshot {} for tenant {} ({} records)",
                date, tenant_id, record_count
            );
            Ok(Some(SnapshotInfo {
                date,
                created_at: now,
                record_count,
            }))
        })
        .await
    }

    /// The tenant's stored snapshots, newest first.
    pub async fn list_snapshots(&self, tenant_id: &TenantId) -> StoreResult<Vec<SnapshotInfo>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT date, created_at, records FROM snapshots WHERE tenant_id = ?1 ORDER BY date DESC",
            )?;
            let rows: Vec<(String, i64, String)> = stmt
                .query_map(params![tenant_id.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<_, _>>()?;
            rows.into_iter()
                .map(|(date, created_at, records)| {
                    let records: Vec<Record> = serde_json::from_str(&records)?;
                    Ok(SnapshotInfo {
                        date: parse_date(&date)?,
                        created_at: Timestamp::from_millis(created_at),
                        record_count: records.len(),
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn load_snapshot(
        &self,
        tenant_id: &TenantId,
        date: NaiveDate,
    ) -> StoreResult<Option<Snapshot>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT created_at, records FROM snapshots WHERE tenant_id = ?1 AND date = ?2",
                    params![tenant_id.as_str(), date.format(DATE_FORMAT).to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|(created_at, records)| {
                Ok(Snapshot {
                    tenant_id: tenant_id.clone(),
                    date,
                    created_at: Timestamp::from_millis(created_at),
                    records: serde_json::from_str(&records)?,
                })
            })
            .transpose()
        })
        .await
    }

    /// Deletes the tenant's snapshots dated more than `retain_days` before `now`.
    pub async fn prune_snapshots(
        &self,
        tenant_id: &TenantId,
        retain_days: u32,
        now: Timestamp,
    ) -> StoreResult<usize> {
        let tenant_id = tenant_id.clone();
        let cutoff = now.minus_days(retain_days).date_utc();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM snapshots WHERE tenant_id = ?1 AND date < ?2",
                params![tenant_id.as_str(), cutoff.format(DATE_FORMAT).to_string()],
            )?;
            if removed > 0 {
                info!("Pruned {} snapshots for tenant {}", removed, tenant_id);
            }
            Ok(removed)
        })
        .await
    }
}

fn parse_date(s: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StoreError::InvalidRecord(format!("bad snapshot date {s}: {e}")))
}
