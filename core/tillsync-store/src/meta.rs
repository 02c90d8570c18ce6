//! Refresh freshness metadata and cross-process drain leases.

use crate::error::StoreResult;
use crate::store::EmbeddedStore;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tillsync_types::{Collection, TenantId, Timestamp};

impl EmbeddedStore {
    // ── Refresh metadata ─────────────────────────────────────────

    /// When the tenant's collection was last refreshed from the remote.
    pub async fn last_refresh(
        &self,
        tenant_id: &TenantId,
        collection: Collection,
    ) -> StoreResult<Option<Timestamp>> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let at: Option<i64> = conn
                .query_row(
                    "SELECT refreshed_at FROM refresh_meta WHERE tenant_id = ?1 AND collection = ?2",
                    params![tenant_id.as_str(), collection.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(at.map(Timestamp::from_millis))
        })
        .await
    }

    pub async fn set_last_refresh(
        &self,
        tenant_id: &TenantId,
        collection: Collection,
        at: Timestamp,
    ) -> StoreResult<()> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO refresh_meta (tenant_id, collection, refreshed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (tenant_id, collection) DO UPDATE SET refreshed_at = excluded.refreshed_at",
                params![tenant_id.as_str(), collection.as_str(), at.as_millis()],
            )?;
            Ok(())
        })
        .await
    }

    /// Forgets the last refresh so the next read goes to the remote.
    pub async fn clear_last_refresh(
        &self,
        tenant_id: &TenantId,
        collection: Collection,
    ) -> StoreResult<bool> {
        let tenant_id = tenant_id.clone();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM refresh_meta WHERE tenant_id = ?1 AND collection = ?2",
                params![tenant_id.as_str(), collection.as_str()],
            )?;
            Ok(n > 0)
        })
        .await
    }

    // ── Drain leases ─────────────────────────────────────────────

    /// Takes (or renews) the tenant's drain lease for `holder`.
    ///
    /// Succeeds when no lease exists, the lease has expired, or `holder`
    /// already owns it. Returns `false` while another live holder has it.
    pub async fn try_acquire_lease(
        &self,
        tenant_id: &TenantId,
        holder: &str,
        now: Timestamp,
        ttl_millis: i64,
    ) -> StoreResult<bool> {
        let tenant_id = tenant_id.clone();
        let holder = holder.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: Option<(String, i64)> = tx
                .query_row(
                    "SELECT holder, expires_at FROM drain_leases WHERE tenant_id = ?1",
                    params![tenant_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let free = match &current {
                None => true,
                Some((owner, expires_at)) => *owner == holder || *expires_at <= now.as_millis(),
            };
            if free {
                tx.execute(
                    "INSERT INTO drain_leases (tenant_id, holder, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT (tenant_id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at",
                    params![tenant_id.as_str(), holder, now.offset_millis(ttl_millis).as_millis()],
                )?;
            }
            tx.commit()?;
            Ok(free)
        })
        .await
    }

    /// Releases the lease if `holder` still owns it.
    pub async fn release_lease(&self, tenant_id: &TenantId, holder: &str) -> StoreResult<bool> {
        let tenant_id = tenant_id.clone();
        let holder = holder.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM drain_leases WHERE tenant_id = ?1 AND holder = ?2",
                params![tenant_id.as_str(), holder],
            )?;
            Ok(n > 0)
        })
        .await
    }
}
