use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tillsync_store::{EmbeddedStore, IndexQuery, StoreError};
use tillsync_types::{
    ActorId, BranchId, Collection, Customer, InventoryItem, Record, RecordBody, RecordKey,
    TenantId, Timestamp,
};

fn item(name: &str, qty: i64) -> RecordBody {
    RecordBody::Inventory(InventoryItem {
        name: name.into(),
        sku: None,
        quantity: qty,
        unit_price_cents: 100,
        units_sold: 0,
    })
}

fn stock(tenant: &str, branch: &str, id: &str, at: i64) -> Record {
    Record::new(id, item(id, 10), Timestamp::from_millis(at))
        .with_tenant(tenant)
        .with_branch(branch)
}

async fn setup() -> EmbeddedStore {
    EmbeddedStore::open_in_memory().await.unwrap()
}

// ── Put / get ────────────────────────────────────────────────────

#[tokio::test]
async fn put_then_get_returns_record() {
    let store = setup().await;
    let record = stock("T1", "B1", "p1", 1);
    store.put(Collection::Inventory, record.clone()).await.unwrap();

    let loaded = store
        .get(Collection::Inventory, &RecordKey::new("T1", "p1"))
        .await
        .unwrap();
    assert_eq!(loaded, Some(record));
}

#[tokio::test]
async fn get_missing_is_none() {
    let store = setup().await;
    let loaded = store
        .get(Collection::Inventory, &RecordKey::new("T1", "nope"))
        .await
        .unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn same_id_in_two_tenants_are_distinct_rows() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "p1", 1)).await.unwrap();
    store.put(Collection::Inventory, stock("T2", "B1", "p1", 2)).await.unwrap();

    let t1 = store.get(Collection::Inventory, &RecordKey::new("T1", "p1")).await.unwrap().unwrap();
    let t2 = store.get(Collection::Inventory, &RecordKey::new("T2", "p1")).await.unwrap().unwrap();
    assert_eq!(t1.created_at, Timestamp::from_millis(1));
    assert_eq!(t2.created_at, Timestamp::from_millis(2));
}

#[tokio::test]
async fn put_upserts() {
    let store = setup().await;
    let mut record = stock("T1", "B1", "p1", 1);
    store.put(Collection::Inventory, record.clone()).await.unwrap();
    record.body = item("p1", 3);
    record.updated_at = Timestamp::from_millis(9);
    store.put(Collection::Inventory, record.clone()).await.unwrap();

    let all = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T1".into()), false)
        .await
        .unwrap();
    assert_eq!(all, vec![record]);
}

#[tokio::test]
async fn put_rejects_wrong_collection() {
    let store = setup().await;
    let err = store
        .put(Collection::Sales, stock("T1", "B1", "p1", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::SchemaMismatch {
            collection: Collection::Sales,
            found: Collection::Inventory
        }
    ));
}

#[tokio::test]
async fn put_rejects_unstamped_record() {
    let store = setup().await;
    let record = Record::new("p1", item("p1", 1), Timestamp::from_millis(1));
    let err = store.put(Collection::Inventory, record).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord(_)));
}

// ── Indexes ──────────────────────────────────────────────────────

#[tokio::test]
async fn by_tenant_branch_only_returns_that_branch() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "a", 1)).await.unwrap();
    store.put(Collection::Inventory, stock("T1", "B2", "b", 2)).await.unwrap();
    store.put(Collection::Inventory, stock("T2", "B1", "c", 3)).await.unwrap();

    let rows = store
        .get_all_by_index(
            Collection::Inventory,
            &IndexQuery::TenantBranch(TenantId::new("T1"), BranchId::new("B1")),
            false,
        )
        .await
        .unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["a"]);
}

#[tokio::test]
async fn soft_deleted_rows_excluded_unless_requested() {
    let store = setup().await;
    let mut gone = stock("T1", "B1", "gone", 1);
    gone.mark_deleted(ActorId::new("u1"), Timestamp::from_millis(5));
    store.put(Collection::Inventory, gone).await.unwrap();
    store.put(Collection::Inventory, stock("T1", "B1", "kept", 2)).await.unwrap();

    let q = IndexQuery::Tenant("T1".into());
    let live = store.get_all_by_index(Collection::Inventory, &q, false).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id.as_str(), "kept");

    let all = store.get_all_by_index(Collection::Inventory, &q, true).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn listing_is_ordered_by_creation() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "late", 30)).await.unwrap();
    store.put(Collection::Inventory, stock("T1", "B1", "early", 10)).await.unwrap();
    store.put(Collection::Inventory, stock("T1", "B1", "mid", 20)).await.unwrap();

    let rows = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T1".into()), false)
        .await
        .unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["early", "mid", "late"]);
}

// ── Hard delete / replace ────────────────────────────────────────

#[tokio::test]
async fn delete_hard_removes_row() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "p1", 1)).await.unwrap();
    let key = RecordKey::new("T1", "p1");

    assert!(store.delete_hard(Collection::Inventory, &key).await.unwrap());
    assert!(!store.delete_hard(Collection::Inventory, &key).await.unwrap());
    assert!(store.get(Collection::Inventory, &key).await.unwrap().is_none());
}

#[tokio::test]
async fn replace_all_swaps_only_that_tenant() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "old", 1)).await.unwrap();
    store.put(Collection::Inventory, stock("T2", "B1", "other", 1)).await.unwrap();

    let replaced = store
        .replace_all(
            Collection::Inventory,
            &TenantId::new("T1"),
            vec![stock("T1", "B1", "new1", 2), stock("T1", "B2", "new2", 3)],
        )
        .await
        .unwrap();
    assert_eq!(replaced, 2);

    let t1 = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T1".into()), true)
        .await
        .unwrap();
    let ids: Vec<_> = t1.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["new1", "new2"]);

    let t2 = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T2".into()), true)
        .await
        .unwrap();
    assert_eq!(t2.len(), 1);
}

#[tokio::test]
async fn replace_all_with_empty_set_clears_tenant() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "a", 1)).await.unwrap();
    let mut gone = stock("T1", "B2", "b", 1);
    gone.mark_deleted(ActorId::new("u1"), Timestamp::from_millis(2));
    store.put(Collection::Inventory, gone).await.unwrap();
    store.put(Collection::Inventory, stock("T2", "B1", "other", 1)).await.unwrap();

    let replaced = store
        .replace_all(Collection::Inventory, &TenantId::new("T1"), Vec::new())
        .await
        .unwrap();
    assert_eq!(replaced, 0);

    let t1 = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T1".into()), true)
        .await
        .unwrap();
    assert!(t1.is_empty());

    let t2 = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T2".into()), true)
        .await
        .unwrap();
    let ids: Vec<_> = t2.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["other"]);
}

#[tokio::test]
async fn replace_all_rejects_foreign_record_and_keeps_old_set() {
    let store = setup().await;
    store.put(Collection::Inventory, stock("T1", "B1", "old", 1)).await.unwrap();

    let err = store
        .replace_all(
            Collection::Inventory,
            &TenantId::new("T1"),
            vec![stock("T1", "B1", "ok", 2), stock("T2", "B1", "foreign", 3)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord(_)));

    let rows = store
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T1".into()), true)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id.as_str(), "old");
}

// ── File-backed ──────────────────────────────────────────────────

#[tokio::test]
async fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("till.db");
    {
        let store = EmbeddedStore::open(&path).await.unwrap();
        let customer = Record::new(
            "c1",
            RecordBody::Customers(Customer {
                name: "Ada".into(),
                phone: Some("555".into()),
                email: None,
            }),
            Timestamp::from_millis(1),
        )
        .with_tenant("T1");
        store.put(Collection::Customers, customer).await.unwrap();
    }

    let store = EmbeddedStore::open(&path).await.unwrap();
    let loaded = store
        .get(Collection::Customers, &RecordKey::new("T1", "c1"))
        .await
        .unwrap();
    assert!(loaded.is_some());
    assert_eq!(store.path(), Some(path.as_path()));
}

#[tokio::test]
async fn two_handles_on_one_file_see_each_others_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");
    let a = EmbeddedStore::open(&path).await.unwrap();
    let b = EmbeddedStore::open(&path).await.unwrap();

    a.put(Collection::Inventory, stock("T1", "B1", "from-a", 1)).await.unwrap();
    b.put(Collection::Inventory, stock("T1", "B1", "from-b", 2)).await.unwrap();

    let seen_by_a = a
        .get_all_by_index(Collection::Inventory, &IndexQuery::Tenant("T1".into()), false)
        .await
        .unwrap();
    assert_eq!(seen_by_a.len(), 2);
}

#[tokio::test]
async fn open_on_unusable_path_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing-dir").join("till.db");
    let err = EmbeddedStore::open(&path).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, StoreError::Unavailable(_)));
}
