//! Write-behind queue end to end: replay order, retry bound, offline gating,
//! persistence across restarts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tether_core::{OperationType, RawLinkState, Reachability};
use tether_db::{Database, DbConfig};
use tether_sync::config::{GuardSettings, ProbeSettings, QueueSettings, StoreSettings};
use tether_sync::testing::{RecordingExecutor, ScriptedProbe};
use tether_sync::{
    Connectivity, ConnectivityBuilder, ConnectivityConfig, GuardError, ManualClock,
    ManualLinkMonitor, MemoryStorage, NetworkStateStore, PendingQueue, ReachabilityProber,
    StateStorage, SyncScheduler, TimeoutGuard,
};

struct Rig {
    link: Arc<ManualLinkMonitor>,
    clock: Arc<ManualClock>,
    executor: Arc<RecordingExecutor>,
    connectivity: Connectivity,
}

fn start() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn rig(raw: RawLinkState, executor: RecordingExecutor) -> Rig {
    let link = Arc::new(ManualLinkMonitor::new(raw));
    let clock = Arc::new(ManualClock::new(start()));
    let executor = Arc::new(executor);

    let connectivity = ConnectivityBuilder::new(ConnectivityConfig::default())
        .with_link_monitor(link.clone())
        .with_probe(Arc::new(ScriptedProbe::reachable()))
        .with_storage(Arc::new(MemoryStorage::new()))
        .with_clock(clock.clone())
        .with_executor(executor.clone())
        .build()
        .unwrap();

    Rig {
        link,
        clock,
        executor,
        connectivity,
    }
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_replay_in_enqueue_order_after_reconnect() {
    let rig = rig(RawLinkState::disconnected(), RecordingExecutor::new());
    rig.connectivity.initialize().await;

    let a = rig
        .connectivity
        .enqueue(OperationType::Create, "note", json!({"title": "A"}))
        .await
        .unwrap();
    rig.clock.advance(chrono::Duration::seconds(1));
    let b = rig
        .connectivity
        .enqueue(OperationType::Update, "note", json!({"title": "B"}))
        .await
        .unwrap();

    settle(100).await;
    assert_eq!(rig.executor.call_count(), 0);

    rig.link.publish(RawLinkState::wifi(Reachability::Reachable));
    settle(500).await;

    let ids: Vec<_> = rig.executor.calls().into_iter().map(|op| op.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert!(rig.connectivity.pending().is_empty());
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_write_is_attempted_exactly_five_times() {
    let rig = rig(
        RawLinkState::wifi(Reachability::Reachable),
        RecordingExecutor::failing(),
    );
    rig.connectivity.initialize().await;

    rig.connectivity
        .enqueue(OperationType::Delete, "note", json!({"id": 7}))
        .await
        .unwrap();

    // One pass on enqueue, then one per 30s tick
    settle(10).await;
    assert_eq!(rig.executor.call_count(), 1);
    assert_eq!(rig.connectivity.pending()[0].retry_count, 1);

    settle(4 * 30_000).await;
    assert_eq!(rig.executor.call_count(), 5);
    assert!(rig.connectivity.pending().is_empty());

    settle(2 * 30_000).await;
    assert_eq!(rig.executor.call_count(), 5);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_guard_returns_fallback_without_calling_op_when_offline() {
    let rig = rig(RawLinkState::disconnected(), RecordingExecutor::new());
    rig.connectivity.initialize().await;

    let mut invoked = false;
    let result: Result<&str, GuardError<String>> = rig
        .connectivity
        .guard()
        .run(
            || {
                invoked = true;
                async { Ok("live") }
            },
            Duration::from_secs(10),
            Some("cached"),
        )
        .await;

    assert_eq!(result.unwrap(), "cached");
    assert!(!invoked);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_mid_flight_replays_exactly_once() {
    let clock = Arc::new(ManualClock::new(start()));
    let link = Arc::new(ManualLinkMonitor::new(RawLinkState::wifi(Reachability::Reachable)));
    let storage = Arc::new(MemoryStorage::new());
    let executor = Arc::new(RecordingExecutor::new());

    let prober = Arc::new(
        ReachabilityProber::new(ProbeSettings::default(), Arc::new(ScriptedProbe::reachable()))
            .unwrap(),
    );
    let store = NetworkStateStore::new(
        StoreSettings::default(),
        link.clone(),
        prober,
        storage.clone(),
        clock.clone(),
    );
    assert!(store.initialize().await.effectively_connected);

    let queue = Arc::new(PendingQueue::new(storage.clone(), clock.clone(), store.watch()));
    let scheduler = SyncScheduler::new(
        QueueSettings::default(),
        queue.clone(),
        TimeoutGuard::new(store.clone(), &GuardSettings::default()),
        executor.clone(),
        store.watch(),
        clock.clone(),
    );

    // Online: enqueue requests a sync, but nothing has run it yet
    let payload_a = json!({"title": "A"});
    queue
        .enqueue(OperationType::Create, "note", payload_a.clone())
        .await
        .unwrap();

    // Link drops before the pass starts
    link.publish(RawLinkState::disconnected());
    settle(200).await;
    assert!(!store.get_state().effectively_connected);

    scheduler.start();
    settle(100).await;
    let report = scheduler.sync().await;

    assert!(report.aborted_offline);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(queue.len(), 1);

    // Within a second of the drop: flap debounce applies
    link.publish(RawLinkState::wifi(Reachability::Reachable));
    settle(1_000).await;

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload, payload_a);
    assert!(queue.is_empty());

    scheduler.stop().await;
    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_sync_calls_run_one_pass() {
    let rig = rig(RawLinkState::disconnected(), RecordingExecutor::new());
    rig.connectivity.initialize().await;
    rig.connectivity
        .enqueue(OperationType::Create, "note", json!({}))
        .await
        .unwrap();

    rig.link.publish(RawLinkState::wifi(Reachability::Reachable));
    rig.executor.set_latency(Duration::from_secs(2));
    settle(150).await;

    // The reconnect pass is still waiting on the executor
    let report = rig.connectivity.sync().await;
    assert!(report.skipped_in_flight);
    assert!(rig.connectivity.status().await.in_flight);

    settle(3_000).await;
    assert_eq!(rig.executor.call_count(), 1);
    assert!(rig.connectivity.pending().is_empty());
    assert!(!rig.connectivity.status().await.in_flight);
    rig.connectivity.teardown().await;
}

#[tokio::test]
async fn test_queue_survives_restart_in_sqlite() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();

    let build = |db: Database| {
        ConnectivityBuilder::new(ConnectivityConfig::default())
            .with_link_monitor(Arc::new(ManualLinkMonitor::new(RawLinkState::disconnected())))
            .with_probe(Arc::new(ScriptedProbe::reachable()))
            .with_database(db)
            .with_executor(Arc::new(RecordingExecutor::new()))
            .build()
            .unwrap()
    };

    let first = build(db.clone());
    first.initialize().await;
    let id = first
        .enqueue(OperationType::Create, "note", json!({"title": "kept"}))
        .await
        .unwrap();
    first.teardown().await;

    let second = build(db.clone());
    second.initialize().await;

    let pending = second.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].payload, json!({"title": "kept"}));

    let storage = tether_sync::SqliteStorage::new(db.clone());
    let state = storage.load_state().await.unwrap().unwrap();
    assert!(!state.is_connected);

    second.teardown().await;
}
