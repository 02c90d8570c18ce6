use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tillsync_store::EmbeddedStore;
use tillsync_sync::transport::mock::MockTarget;
use tillsync_sync::{
    DrainStop, ManualConnectivity, PushEntry, PushRequest, SyncConfig, SyncQueue, SyncTarget,
};
use tillsync_types::{
    Collection, EntryState, InventoryItem, ManualClock, Record, RecordBody, RecordId,
    SyncOperation, SyncQueueEntry, TenantId, Timestamp,
};

struct Harness {
    store: EmbeddedStore,
    target: Arc<MockTarget>,
    online: Arc<ManualConnectivity>,
    queue: SyncQueue,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness(config: SyncConfig) -> Harness {
    init_tracing();
    let store = EmbeddedStore::open_in_memory().await.unwrap();
    let target = Arc::new(MockTarget::new());
    let online = Arc::new(ManualConnectivity::new(true));
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let queue = SyncQueue::new(store.clone(), target.clone(), online.clone(), clock, config);
    Harness {
        store,
        target,
        online,
        queue,
    }
}

fn manual() -> SyncConfig {
    SyncConfig {
        auto_drain: false,
        ..Default::default()
    }
}

fn t1() -> TenantId {
    TenantId::new("T1")
}

fn stock(id: &str, qty: i64) -> Record {
    Record::new(
        id,
        RecordBody::Inventory(InventoryItem {
            name: id.into(),
            sku: None,
            quantity: qty,
            unit_price_cents: 100,
            units_sold: 0,
        }),
        Timestamp::from_millis(qty),
    )
    .with_tenant("T1")
}

async fn enqueue(h: &Harness, id: &str, qty: i64) -> tillsync_types::EntryId {
    h.queue
        .enqueue(
            &t1(),
            SyncOperation::Update,
            Collection::Inventory,
            &RecordId::new(id),
            stock(id, qty),
        )
        .await
        .unwrap()
}

// ── Ordering and resumption ──────────────────────────────────────

#[tokio::test]
async fn failed_entry_stops_drain_and_next_drain_resumes_there() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    let e2 = enqueue(&h, "p2", 2).await;
    let e3 = enqueue(&h, "p1", 3).await;
    assert_ne!(e1, e3, "p1 updates separated by p2 must not coalesce");

    h.target.fail_record("p2");
    let first = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(first.delivered, vec![e1]);
    assert!(matches!(first.stop, DrainStop::Failed { entry_id, .. } if entry_id == e2));

    let left = h.queue.entries(&t1()).await.unwrap();
    let ids: Vec<_> = left.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, vec![e2, e3]);
    assert_eq!(left[0].attempts, 1);
    assert_eq!(left[1].attempts, 0);

    h.target.heal_record("p2");
    let second = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(second.delivered, vec![e2, e3]);
    assert_eq!(second.stop, DrainStop::Drained);
    assert_eq!(h.target.applied(), vec![e1, e2, e3]);
    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 0);
}

#[tokio::test]
async fn each_push_carries_one_entry_with_its_id() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    let e2 = enqueue(&h, "p2", 2).await;
    h.queue.drain(&t1()).await.unwrap();

    let requests = h.target.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.entries.len() == 1 && r.tenant_id == t1()));
    assert_eq!(requests[0].entries[0].entry_id, e1);
    assert_eq!(requests[1].entries[0].entry_id, e2);
}

#[tokio::test]
async fn coalesced_mutations_deliver_once() {
    let h = harness(manual()).await;
    let a = enqueue(&h, "p1", 1).await;
    let b = enqueue(&h, "p1", 2).await;
    assert_eq!(a, b);
    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 1);

    h.queue.drain(&t1()).await.unwrap();
    let requests = h.target.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].entries[0].payload.updated_at, Timestamp::from_millis(2));
}

// ── Retry / dead letter ──────────────────────────────────────────

#[tokio::test]
async fn entry_succeeding_on_last_attempt_is_removed() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    h.target.fail_next_pushes(2);

    for _ in 0..2 {
        let report = h.queue.drain(&t1()).await.unwrap();
        assert!(matches!(report.stop, DrainStop::Failed { .. }));
    }
    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.delivered, vec![e1]);
    assert!(h.queue.dead_letters(&t1()).await.unwrap().is_empty());
}

#[tokio::test]
async fn entry_failing_max_attempts_is_dead_lettered_and_queue_moves_on() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    let e2 = enqueue(&h, "p2", 2).await;
    h.target.fail_record("p1");

    for _ in 0..2 {
        h.queue.drain(&t1()).await.unwrap();
    }
    let third = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(third.dead_lettered, vec![e1]);

    let dead = h.queue.dead_letters(&t1()).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].entry.attempts, 3);
    assert!(dead[0].entry.last_error.is_some());

    let next = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(next.delivered, vec![e2]);
}

#[tokio::test]
async fn rejection_counts_as_failed_attempt() {
    let h = harness(SyncConfig {
        max_attempts: 1,
        auto_drain: false,
        ..Default::default()
    })
    .await;
    let e1 = enqueue(&h, "p1", 1).await;
    h.target.reject_record("p1", "tenant mismatch");

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.dead_lettered, vec![e1]);
    match report.stop {
        DrainStop::Failed { error, .. } => assert!(error.contains("tenant mismatch")),
        other => panic!("unexpected stop: {other:?}"),
    }
}

#[tokio::test]
async fn requeued_dead_letter_is_delivered() {
    let h = harness(SyncConfig {
        max_attempts: 1,
        auto_drain: false,
        ..Default::default()
    })
    .await;
    let e1 = enqueue(&h, "p1", 1).await;
    h.target.fail_record("p1");
    h.queue.drain(&t1()).await.unwrap();
    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 0);

    h.target.heal_record("p1");
    let requeued = h.queue.requeue_dead_letter(&t1(), e1).await.unwrap().unwrap();
    assert_ne!(requeued, e1);
    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.delivered, vec![requeued]);
    assert_eq!(h.target.applied(), vec![requeued]);
    assert!(h.queue.dead_letters(&t1()).await.unwrap().is_empty());
}

#[tokio::test]
async fn requeued_dead_letter_is_not_dropped_as_duplicate() {
    let h = harness(SyncConfig {
        max_attempts: 1,
        auto_drain: false,
        ..Default::default()
    })
    .await;
    let e1 = enqueue(&h, "p1", 1).await;
    // The remote applied e1 but its answer never arrived.
    let head = h.store.queue_head(&t1()).await.unwrap().unwrap();
    h.target
        .push(PushRequest {
            tenant_id: t1(),
            entries: vec![PushEntry::from(&head)],
        })
        .await
        .unwrap();
    h.target.fail_record("p1");
    h.queue.drain(&t1()).await.unwrap();

    h.target.heal_record("p1");
    let requeued = h.queue.requeue_dead_letter(&t1(), e1).await.unwrap().unwrap();
    enqueue(&h, "p1", 7).await;
    h.queue.drain(&t1()).await.unwrap();

    assert_eq!(h.target.applied(), vec![e1, requeued]);
    let last = h.target.requests().pop().unwrap();
    assert_eq!(last.entries[0].payload.updated_at, Timestamp::from_millis(7));
}

// ── Connectivity, leases and crashes ─────────────────────────────

#[tokio::test]
async fn offline_drain_delivers_nothing() {
    let h = harness(manual()).await;
    enqueue(&h, "p1", 1).await;
    h.online.set_online(false);

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.stop, DrainStop::Offline);
    assert!(h.target.requests().is_empty());
    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 1);
}

#[tokio::test]
async fn drain_yields_to_foreign_lease() {
    let h = harness(manual()).await;
    enqueue(&h, "p1", 1).await;
    assert!(h
        .store
        .try_acquire_lease(&t1(), "other-process", Timestamp::from_millis(1_000), 60_000)
        .await
        .unwrap());

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.stop, DrainStop::LeaseHeld);
    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 1);

    h.store.release_lease(&t1(), "other-process").await.unwrap();
    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.stop, DrainStop::Drained);
}

#[tokio::test]
async fn in_flight_entry_from_crashed_drainer_is_redelivered_without_penalty() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    h.store.queue_mark_in_flight(e1).await.unwrap();
    let head = h.store.queue_head(&t1()).await.unwrap().unwrap();
    assert_eq!(head.state, EntryState::InFlight);

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.delivered, vec![e1]);
    assert_eq!(h.target.applied(), vec![e1]);
}

#[tokio::test]
async fn mutation_after_recovered_in_flight_entry_is_delivered_separately() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    let head = h.store.queue_head(&t1()).await.unwrap().unwrap();
    h.store.queue_mark_in_flight(e1).await.unwrap();
    // The drainer crashed after the remote applied e1 but before the ack.
    h.target
        .push(PushRequest {
            tenant_id: t1(),
            entries: vec![PushEntry::from(&head)],
        })
        .await
        .unwrap();
    h.store.queue_recover_in_flight(&t1()).await.unwrap();

    let e2 = enqueue(&h, "p1", 2).await;
    assert_ne!(e2, e1);

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.delivered, vec![e1, e2]);
    assert_eq!(h.target.applied(), vec![e1, e2]);
    let last = h.target.requests().pop().unwrap();
    assert_eq!(last.entries[0].payload.updated_at, Timestamp::from_millis(2));
}

#[tokio::test]
async fn redelivery_after_lost_ack_is_idempotent() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    h.queue.drain(&t1()).await.unwrap();

    // Same entry queued again, as if the acknowledgment had been lost.
    let pushed = h.target.requests()[0].entries[0].clone();
    let mut replay = SyncQueueEntry::new(
        t1(),
        pushed.operation,
        pushed.collection,
        pushed.record_id,
        pushed.payload,
        pushed.enqueued_at,
    );
    replay.entry_id = pushed.entry_id;
    h.store.queue_append(replay).await.unwrap();

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.delivered, vec![e1]);
    assert_eq!(h.target.requests().len(), 2);
    assert_eq!(h.target.applied(), vec![e1]);
}

// ── Auto drain ───────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_while_online_drains_in_background() {
    let h = harness(SyncConfig::default()).await;
    enqueue(&h, "p1", 1).await;

    for _ in 0..100 {
        if h.queue.pending_count(&t1()).await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 0);
    assert_eq!(h.target.applied().len(), 1);
}

#[tokio::test]
async fn enqueue_while_offline_only_buffers() {
    let h = harness(SyncConfig::default()).await;
    h.online.set_online(false);
    enqueue(&h, "p1", 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.queue.pending_count(&t1()).await.unwrap(), 1);
    assert!(h.target.requests().is_empty());

    h.online.set_online(true);
    let reports = h.queue.drain_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.delivered.len(), 1);
}

#[tokio::test]
async fn concurrent_drains_of_one_tenant_coalesce() {
    let h = harness(manual()).await;
    for i in 0..5 {
        enqueue(&h, &format!("p{i}"), i).await;
    }

    let (ta, tb) = (t1(), t1());
    let (a, b) = tokio::join!(h.queue.drain(&ta), h.queue.drain(&tb));
    let (a, b) = (a.unwrap(), b.unwrap());
    let delivered = a.delivered.len() + b.delivered.len();
    assert_eq!(delivered, 5);
    assert_eq!(h.target.applied().len(), 5);
    assert_eq!(h.target.requests().len(), 5);
}

#[tokio::test]
async fn cancelled_drain_does_not_block_later_drains() {
    let h = harness(manual()).await;
    let e1 = enqueue(&h, "p1", 1).await;
    h.target.stall_next_pushes(1);

    let cancelled = tokio::time::timeout(Duration::from_millis(50), h.queue.drain(&t1())).await;
    assert!(cancelled.is_err());

    let report = h.queue.drain(&t1()).await.unwrap();
    assert_eq!(report.stop, DrainStop::Drained);
    assert_eq!(report.delivered, vec![e1]);
    assert_eq!(h.target.applied(), vec![e1]);
}

#[tokio::test]
async fn drain_all_continues_past_a_failing_tenant() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till.db");
    let store = EmbeddedStore::open(&path).await.unwrap();
    let target = Arc::new(MockTarget::new());
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let queue = SyncQueue::new(
        store,
        target.clone(),
        Arc::new(ManualConnectivity::new(true)),
        clock,
        manual(),
    );
    let t2 = TenantId::new("T2");
    for tenant in [t1(), t2.clone()] {
        queue
            .enqueue(
                &tenant,
                SyncOperation::Create,
                Collection::Inventory,
                &RecordId::new("p1"),
                stock("p1", 1).with_tenant(tenant.as_str()),
            )
            .await
            .unwrap();
    }

    // An unreadable entry makes T1's drain error out.
    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute("UPDATE sync_queue SET payload = 'not json' WHERE tenant_id = 'T1'", [])
        .unwrap();

    let reports = queue.drain_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, t2);
    assert_eq!(reports[0].1.stop, DrainStop::Drained);
    assert_eq!(target.applied().len(), 1);
    assert_eq!(queue.pending_count(&t1()).await.unwrap(), 1);
}

// ── Durability ───────────────────────────────────────────────────

#[tokio::test]
async fn buffered_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till.db");
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let online = Arc::new(ManualConnectivity::new(false));

    let e1 = {
        let store = EmbeddedStore::open(&path).await.unwrap();
        let queue = SyncQueue::new(
            store,
            Arc::new(MockTarget::new()),
            online.clone(),
            clock.clone(),
            manual(),
        );
        queue
            .enqueue(
                &t1(),
                SyncOperation::Create,
                Collection::Inventory,
                &RecordId::new("p1"),
                stock("p1", 1),
            )
            .await
            .unwrap()
    };

    let target = Arc::new(MockTarget::new());
    let store = EmbeddedStore::open(&path).await.unwrap();
    online.set_online(true);
    let queue = SyncQueue::new(store, target.clone(), online, clock, manual());
    assert_eq!(queue.pending_count(&t1()).await.unwrap(), 1);

    let report = queue.drain(&t1()).await.unwrap();
    assert_eq!(report.delivered, vec![e1]);
    assert_eq!(target.applied(), vec![e1]);
}
