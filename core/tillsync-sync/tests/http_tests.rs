use pretty_assertions::assert_eq;
use serde_json::json;
use tillsync_sync::{
    FetchQuery, HttpSyncTarget, HttpTargetConfig, PushEntry, PushRequest, SyncError, SyncTarget,
};
use tillsync_types::{
    Collection, Customer, EntryId, Record, RecordBody, SyncOperation, TenantId, Timestamp,
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target(server: &MockServer) -> HttpSyncTarget {
    HttpSyncTarget::new(HttpTargetConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .unwrap()
}

fn customer(id: &str) -> Record {
    Record::new(
        id,
        RecordBody::Customers(Customer {
            name: "Ada".into(),
            phone: None,
            email: None,
        }),
        Timestamp::from_millis(10),
    )
    .with_tenant("T1")
}

fn push_request(entry_id: EntryId) -> PushRequest {
    PushRequest {
        tenant_id: TenantId::new("T1"),
        entries: vec![PushEntry {
            entry_id,
            operation: SyncOperation::Create,
            collection: Collection::Customers,
            record_id: "c1".into(),
            payload: customer("c1"),
            enqueued_at: Timestamp::from_millis(10),
        }],
    }
}

// ── Config defaults ─────────────────────────────────────────────

#[test]
fn http_config_default() {
    let cfg = HttpTargetConfig::default();
    assert_eq!(cfg.base_url, "http://127.0.0.1:8787");
    assert_eq!(cfg.timeout_ms, 10_000);
    assert!(cfg.auth_token.is_none());
}

#[test]
fn http_config_partial_json_fills_defaults() {
    let cfg: HttpTargetConfig =
        serde_json::from_str(r#"{"base_url": "https://sync.example.com"}"#).unwrap();
    assert_eq!(cfg.base_url, "https://sync.example.com");
    assert_eq!(cfg.timeout_ms, 10_000);
}

// ── Push ────────────────────────────────────────────────────────

#[tokio::test]
async fn push_posts_camel_case_body_and_parses_ack() {
    let server = MockServer::start().await;
    let entry_id = EntryId::new();

    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(body_partial_json(json!({
            "tenantId": "T1",
            "entries": [{ "entryId": entry_id.to_string(), "operation": "create", "collection": "customers" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": [entry_id.to_string()],
            "rejected": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = target(&server).push(push_request(entry_id)).await.unwrap();
    assert!(response.is_accepted(entry_id));
}

#[tokio::test]
async fn push_surfaces_rejections() {
    let server = MockServer::start().await;
    let entry_id = EntryId::new();

    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": [],
            "rejected": [{ "id": entry_id.to_string(), "reason": "tenant mismatch" }]
        })))
        .mount(&server)
        .await;

    let response = target(&server).push(push_request(entry_id)).await.unwrap();
    assert!(!response.is_accepted(entry_id));
    assert_eq!(response.rejection(entry_id), Some("tenant mismatch"));
}

#[tokio::test]
async fn push_server_error_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = target(&server).push(push_request(EntryId::new())).await.unwrap_err();
    match err {
        SyncError::Network(msg) => assert!(msg.contains("503")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn push_garbage_response_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = target(&server).push(push_request(EntryId::new())).await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)));
}

#[tokio::test]
async fn auth_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accepted": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let target = HttpSyncTarget::new(HttpTargetConfig {
        base_url: format!("{}/", server.uri()),
        auth_token: Some("s3cret".into()),
        ..Default::default()
    })
    .unwrap();
    target.push(push_request(EntryId::new())).await.unwrap();
}

// ── Fetch ───────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_sends_query_and_parses_records() {
    let server = MockServer::start().await;
    let record = customer("c1");

    Mock::given(method("GET"))
        .and(path("/sync"))
        .and(query_param("tenantId", "T1"))
        .and(query_param("collection", "customers"))
        .and(query_param("since", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [record] })))
        .expect(1)
        .mount(&server)
        .await;

    let query = FetchQuery {
        tenant_id: TenantId::new("T1"),
        collection: Collection::Customers,
        since: Some(Timestamp::from_millis(500)),
    };
    let response = target(&server).fetch(query).await.unwrap();
    assert_eq!(response.records, vec![record]);
}

#[tokio::test]
async fn unreachable_target_is_network_error() {
    let target = HttpSyncTarget::new(HttpTargetConfig {
        base_url: "http://127.0.0.1:1".into(),
        timeout_ms: 500,
        auth_token: None,
    })
    .unwrap();
    let err = target
        .fetch(FetchQuery::full(TenantId::new("T1"), Collection::Sales))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Network(_) | SyncError::Timeout));
}
