//! Connectivity verdicts end to end: link events, probes, listeners.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tether_core::{CellularGeneration, LinkPhase, NetworkState, RawLinkState, Reachability};
use tether_sync::testing::{RecordingExecutor, ScriptedProbe};
use tether_sync::{
    Connectivity, ConnectivityBuilder, ConnectivityConfig, ManualClock, ManualLinkMonitor,
    MemoryStorage,
};

struct Rig {
    link: Arc<ManualLinkMonitor>,
    probe: Arc<ScriptedProbe>,
    connectivity: Connectivity,
}

fn rig(raw: RawLinkState, probe: ScriptedProbe) -> Rig {
    let link = Arc::new(ManualLinkMonitor::new(raw));
    let probe = Arc::new(probe);

    let connectivity = ConnectivityBuilder::new(ConnectivityConfig::default())
        .with_link_monitor(link.clone())
        .with_probe(probe.clone())
        .with_storage(Arc::new(MemoryStorage::new()))
        .with_clock(Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )))
        .with_executor(Arc::new(RecordingExecutor::new()))
        .build()
        .unwrap();

    Rig {
        link,
        probe,
        connectivity,
    }
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_cellular_goes_offline_after_one_probe_failure() {
    let rig = rig(
        RawLinkState::cellular(Reachability::Unknown, Some(CellularGeneration::G4)),
        ScriptedProbe::unreachable(),
    );

    // Optimistic until the probe answers
    assert!(rig.connectivity.initialize().await.effectively_connected);

    settle(10).await;

    let state = rig.connectivity.state();
    assert!(!state.effectively_connected);
    assert!(state.is_connected);
    assert_eq!(rig.connectivity.store().phase(), LinkPhase::Degraded);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wifi_needs_two_probe_failures() {
    let rig = rig(RawLinkState::wifi(Reachability::Unknown), ScriptedProbe::unreachable());
    rig.connectivity.initialize().await;

    settle(10).await;
    assert_eq!(rig.connectivity.store().prober().failures().get(), 1);
    assert!(rig.connectivity.state().effectively_connected);

    // Next periodic probe
    settle(30_000).await;
    assert_eq!(rig.connectivity.store().prober().failures().get(), 2);
    assert!(!rig.connectivity.state().effectively_connected);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_probe_success_brings_link_back() {
    let rig = rig(
        RawLinkState::cellular(Reachability::Unknown, Some(CellularGeneration::G5)),
        ScriptedProbe::unreachable(),
    );
    rig.connectivity.initialize().await;
    settle(10).await;
    assert!(!rig.connectivity.state().effectively_connected);

    rig.probe.set_reachable(true);
    settle(30_000).await;

    assert!(rig.connectivity.state().effectively_connected);
    assert_eq!(rig.connectivity.store().prober().failures().get(), 0);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_primary_down_fallback_keeps_online() {
    let rig = rig(RawLinkState::wifi(Reachability::Unknown), ScriptedProbe::reachable());
    let config = ConnectivityConfig::default();
    rig.probe.set_endpoint_down(&config.probe.primary_url, true);

    rig.connectivity.initialize().await;
    settle(10).await;

    assert!(rig.connectivity.state().effectively_connected);
    assert_eq!(rig.connectivity.store().prober().failures().get(), 0);
    assert!(rig.probe.calls() >= 2);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invariant_holds_for_every_notified_state() {
    let rig = rig(RawLinkState::wifi(Reachability::Reachable), ScriptedProbe::unreachable());
    rig.connectivity.initialize().await;

    let seen: Arc<Mutex<Vec<NetworkState>>> = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let _sub = rig
        .connectivity
        .subscribe(move |state| log.lock().unwrap().push(state.clone()));

    let sequence = [
        RawLinkState::disconnected(),
        RawLinkState::cellular(Reachability::Unknown, Some(CellularGeneration::G3)),
        RawLinkState::wifi(Reachability::Unreachable),
        RawLinkState::cellular(Reachability::Reachable, None),
        RawLinkState::wifi(Reachability::Unknown),
        RawLinkState::disconnected(),
    ];
    for raw in sequence {
        rig.link.publish(raw);
        settle(2_000).await;
    }

    let seen = seen.lock().unwrap();
    assert!(seen.len() > sequence.len());
    assert!(seen.iter().all(NetworkState::is_consistent));
    assert!(!seen.last().unwrap().is_connected);
    drop(seen);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_twice_stops_notifications() {
    let rig = rig(RawLinkState::wifi(Reachability::Reachable), ScriptedProbe::reachable());
    rig.connectivity.initialize().await;

    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let sub = rig
        .connectivity
        .subscribe(move |_| *counter.lock().unwrap() += 1);
    assert_eq!(*calls.lock().unwrap(), 1);

    sub.unsubscribe();
    sub.unsubscribe();

    rig.link.publish(RawLinkState::disconnected());
    settle(1_000).await;

    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(!rig.connectivity.state().effectively_connected);
    rig.connectivity.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_teardown_stops_reacting() {
    let rig = rig(RawLinkState::wifi(Reachability::Reachable), ScriptedProbe::reachable());
    rig.connectivity.initialize().await;

    rig.connectivity.teardown().await;
    rig.connectivity.teardown().await;

    rig.link.publish(RawLinkState::disconnected());
    settle(1_000).await;

    assert!(rig.connectivity.state().effectively_connected);
    assert!(!rig.connectivity.store().prober().is_running());
}
