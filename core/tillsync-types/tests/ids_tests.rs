use std::collections::HashSet;
use std::str::FromStr;
use tillsync_types::{BranchId, EntryId, RecordId, TenantId};

// ── String identifiers ────────────────────────────────────────────

#[test]
fn tenant_id_display_matches_input() {
    let id = TenantId::new("T1");
    assert_eq!(id.to_string(), "T1");
    assert_eq!(id.as_str(), "T1");
}

#[test]
fn tenant_id_from_str_rejects_empty() {
    assert!(TenantId::from_str("").is_err());
    assert!(TenantId::from_str("   ").is_err());
}

#[test]
fn branch_id_from_str_accepts_value() {
    let id = BranchId::from_str("downtown").unwrap();
    assert_eq!(id, BranchId::new("downtown"));
}

#[test]
fn record_id_serializes_as_plain_string() {
    let id = RecordId::new("p1");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, r#""p1""#);
}

#[test]
fn string_ids_hash_and_eq() {
    let mut set = HashSet::new();
    set.insert(TenantId::new("T1"));
    set.insert(TenantId::from("T1"));
    set.insert(TenantId::new("T2"));
    assert_eq!(set.len(), 2);
}

// ── EntryId ───────────────────────────────────────────────────────

#[test]
fn entry_id_new_is_unique() {
    let a = EntryId::new();
    let b = EntryId::new();
    assert_ne!(a, b);
}

#[test]
fn entry_ids_sort_by_creation() {
    let a = EntryId::new();
    let b = EntryId::new();
    assert!(a < b);
}

#[test]
fn entry_id_display_and_parse() {
    let id = EntryId::new();
    let parsed: EntryId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn entry_id_parse_invalid() {
    assert!(EntryId::from_str("not-a-uuid").is_err());
}

#[test]
fn entry_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    assert_eq!(EntryId::from_uuid(uuid).as_uuid(), uuid);
}
