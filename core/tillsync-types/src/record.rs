//! Typed operational records.
//!
//! Every collection has one concrete body type. The envelope ([`Record`])
//! carries the tenant/branch stamps and the soft-delete metadata shared by
//! all collections.

use crate::{ActorId, BranchId, Error, RecordId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named, keyed collection of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Catalog items and stock levels.
    Inventory,
    /// Sales transactions.
    Sales,
    Suppliers,
    Customers,
    Expenses,
}

impl Collection {
    /// All collections, in schema order.
    pub const ALL: [Collection; 5] = [
        Collection::Inventory,
        Collection::Sales,
        Collection::Suppliers,
        Collection::Customers,
        Collection::Expenses,
    ];

    /// The collection's stable name (also its table name).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Collection::Inventory => "inventory",
            Collection::Sales => "sales",
            Collection::Suppliers => "suppliers",
            Collection::Customers => "customers",
            Collection::Expenses => "expenses",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::UnknownCollection(s.to_string()))
    }
}

/// Composite primary key `[tenant_id, id]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub tenant_id: TenantId,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(tenant_id: impl Into<TenantId>, id: impl Into<RecordId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
        }
    }
}

/// A catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Lifetime units sold; used to rank large catalogs.
    #[serde(default)]
    pub units_sold: u64,
}

/// One line of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub item_id: RecordId,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// A completed sales transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub lines: Vec<SaleLine>,
    pub total_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<RecordId>,
    pub occurred_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub category: String,
    pub amount_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub incurred_at: Timestamp,
}

/// The collection-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "data", rename_all = "lowercase")]
pub enum RecordBody {
    Inventory(InventoryItem),
    Sales(Sale),
    Suppliers(Supplier),
    Customers(Customer),
    Expenses(Expense),
}

impl RecordBody {
    /// The collection this body belongs to.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            RecordBody::Inventory(_) => Collection::Inventory,
            RecordBody::Sales(_) => Collection::Sales,
            RecordBody::Suppliers(_) => Collection::Suppliers,
            RecordBody::Customers(_) => Collection::Customers,
            RecordBody::Expenses(_) => Collection::Expenses,
        }
    }
}

/// A stored record: envelope plus typed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    /// Set by the tenant isolation layer before persistence; immutable after.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<ActorId>,
    /// When the last restore happened. Deletion metadata, like `deleted_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<Timestamp>,
    pub body: RecordBody,
}

impl Record {
    /// Creates an unstamped record created and updated at `now`.
    pub fn new(id: impl Into<RecordId>, body: RecordBody, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            tenant_id: None,
            branch_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            restored_at: None,
            body,
        }
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch_id: impl Into<BranchId>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    /// The collection this record belongs to.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        self.body.collection()
    }

    /// The composite key, if the record has been stamped with a tenant.
    #[must_use]
    pub fn key(&self) -> Option<RecordKey> {
        self.tenant_id.as_ref().map(|t| RecordKey {
            tenant_id: t.clone(),
            id: self.id.clone(),
        })
    }

    /// Whether the record is soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Marks the record soft-deleted by `actor` at `at`.
    pub fn mark_deleted(&mut self, actor: ActorId, at: Timestamp) {
        self.deleted_at = Some(at);
        self.deleted_by = Some(actor);
    }

    /// Clears the soft-delete metadata and nothing else.
    pub fn clear_deletion(&mut self) {
        self.deleted_at = None;
        self.deleted_by = None;
    }

    /// Clears the soft-delete metadata and stamps the restore at `at`.
    pub fn mark_restored(&mut self, at: Timestamp) {
        self.clear_deletion();
        self.restored_at = Some(at);
    }

    /// When this version was last written, for last-writer-wins.
    ///
    /// Soft delete and restore leave `updated_at` alone, so their own
    /// stamps count as writes too.
    #[must_use]
    pub fn written_at(&self) -> Timestamp {
        [self.deleted_at, self.restored_at]
            .into_iter()
            .flatten()
            .fold(self.updated_at, Ord::max)
    }
}
