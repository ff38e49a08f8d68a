//! # Sync Scheduler
//!
//! Drains the pending queue through an injected executor whenever
//! connectivity allows.
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Scheduler Loop                                    │
//! │                                                                         │
//! │   startup with a non-empty queue ────┐                                 │
//! │   every sync_interval (30s) ─────────┤                                 │
//! │   phase Degraded/Disconnected        │    queue non-empty              │
//! │        → Connected ──────────────────┼──► and online? ──► sync()       │
//! │   enqueue() while online ────────────┘                                 │
//! │   shutdown ──► exit                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One Pass
//! ```text
//! in-flight? ──yes──► skip
//!     │
//!     ▼
//! for op in queue (enqueued_at order):
//!     offline?                  ──► abort the rest of the pass
//!     entity failed this pass?  ──► defer to next pass
//!     guard.run(executor(op), 15s)
//!         Ok                    ──► remove
//!         Err / timeout         ──► retry_count += 1, drop at max_retries
//! ```
//!
//! Entries run one at a time so two writes to the same entity apply in
//! enqueue order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tether_core::{LinkPhase, NetworkState, PendingOperation};

use crate::clock::Clock;
use crate::config::QueueSettings;
use crate::guard::{GuardError, TimeoutGuard};
use crate::queue::{PendingQueue, RetryVerdict};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Executor
// =============================================================================

/// Error type returned by executors.
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync>;

/// Applies one queued write to the backend.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, op: &PendingOperation) -> Result<(), ExecutorError>;
}

/// Executor built from a closure. See [`executor_fn`].
pub struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> OperationExecutor for FnExecutor<F>
where
    F: Fn(PendingOperation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecutorError>> + Send,
{
    async fn execute(&self, op: &PendingOperation) -> Result<(), ExecutorError> {
        (self.f)(op.clone()).await
    }
}

/// Wraps an async closure as an executor.
///
/// ```rust
/// use tether_sync::scheduler::executor_fn;
///
/// let executor = executor_fn(|op| async move {
///     println!("replaying {} {}", op.op_type, op.entity);
///     Ok(())
/// });
/// # let _ = executor;
/// ```
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn OperationExecutor>
where
    F: Fn(PendingOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ExecutorError>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one `sync()` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Executor invocations made.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries removed after their last allowed failure.
    pub dropped: usize,
    /// Entries skipped because an earlier entry of the same entity failed.
    pub deferred: usize,
    /// The pass stopped early because connectivity was lost.
    pub aborted_offline: bool,
    /// Another pass was already running; nothing was done.
    pub skipped_in_flight: bool,
}

/// Current scheduler status for external queries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A pass is running.
    pub in_flight: bool,

    /// Entries left after the last pass.
    pub pending_count: usize,

    /// End of the last completed pass.
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Last executor error (if any).
    pub last_error: Option<String>,
}

/// Clears the in-flight flag when a pass ends, including by panic or
/// cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Scheduler
// =============================================================================

/// Periodic and event-driven queue drainer.
pub struct SyncScheduler {
    settings: QueueSettings,
    queue: Arc<PendingQueue>,
    guard: TimeoutGuard,
    executor: Arc<dyn OperationExecutor>,
    connectivity: watch::Receiver<NetworkState>,
    clock: Arc<dyn Clock>,

    in_flight: AtomicBool,
    status: RwLock<SyncStatus>,

    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        settings: QueueSettings,
        queue: Arc<PendingQueue>,
        guard: TimeoutGuard,
        executor: Arc<dyn OperationExecutor>,
        connectivity: watch::Receiver<NetworkState>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(SyncScheduler {
            settings,
            queue,
            guard,
            executor,
            connectivity,
            clock,
            in_flight: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::default()),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Returns the current status.
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.status.read().await.clone();
        status.pending_count = self.queue.len();
        status
    }

    fn is_online(&self) -> bool {
        self.connectivity.borrow().effectively_connected
    }

    /// Runs one drain pass.
    ///
    /// Never fails: executor errors become retry counts, persistence errors
    /// are logged by the queue.
    pub async fn sync(&self) -> SyncReport {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Sync already in flight, skipping");
            return SyncReport {
                skipped_in_flight: true,
                ..SyncReport::default()
            };
        };

        self.status.write().await.in_flight = true;

        let pending = self.queue.get_pending();
        let mut report = SyncReport::default();
        let mut failed_entities: HashSet<String> = HashSet::new();
        let mut last_error = None;

        if !pending.is_empty() {
            info!(pending = pending.len(), "Starting sync pass");
        }

        for (index, op) in pending.iter().enumerate() {
            if !self.is_online() {
                info!(
                    remaining = pending.len() - index,
                    "Connectivity lost, aborting sync pass"
                );
                report.aborted_offline = true;
                break;
            }

            if failed_entities.contains(&op.entity) {
                debug!(
                    id = %op.id,
                    entity = %op.entity,
                    "Deferring until earlier write succeeds"
                );
                report.deferred += 1;
                continue;
            }

            let executor = &self.executor;
            let result = self
                .guard
                .run(
                    move || executor.execute(op),
                    self.settings.executor_timeout(),
                    None,
                )
                .await;

            match result {
                Ok(()) => {
                    report.attempted += 1;
                    report.succeeded += 1;
                    self.queue.remove(&op.id).await;
                    debug!(
                        id = %op.id,
                        entity = %op.entity,
                        op_type = %op.op_type,
                        "Operation replayed"
                    );
                }
                Err(GuardError::NetworkUnavailable) => {
                    info!("Connectivity lost, aborting sync pass");
                    report.aborted_offline = true;
                    break;
                }
                Err(e) => {
                    report.attempted += 1;
                    report.failed += 1;
                    failed_entities.insert(op.entity.clone());

                    let verdict = self
                        .queue
                        .record_failure(&op.id, self.settings.max_retries)
                        .await;
                    if let Some(RetryVerdict::Dropped { .. }) = verdict {
                        report.dropped += 1;
                    }

                    warn!(
                        id = %op.id,
                        entity = %op.entity,
                        op_type = %op.op_type,
                        error = %e,
                        ?verdict,
                        "Operation replay failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        {
            let mut status = self.status.write().await;
            status.in_flight = false;
            status.pending_count = self.queue.len();
            status.last_sync_at = Some(self.clock.now());
            if last_error.is_some() {
                status.last_error = last_error;
            }
        }

        if report.attempted > 0 || report.aborted_offline {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                dropped = report.dropped,
                deferred = report.deferred,
                aborted_offline = report.aborted_offline,
                "Sync pass finished"
            );
        }

        report
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Starts the trigger loop. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        *lock(&self.shutdown_tx) = Some(shutdown_tx);

        info!(
            interval_secs = self.settings.sync_interval_secs,
            max_retries = self.settings.max_retries,
            "Starting sync scheduler"
        );

        let scheduler = Arc::clone(self);
        *task = Some(tokio::spawn(scheduler.run(shutdown_rx)));
    }

    /// Stops the loop and waits for a running pass to finish. Idempotent.
    pub async fn stop(&self) {
        let shutdown_tx = lock(&self.shutdown_tx).take();
        let task = lock(&self.task).take();

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Sync scheduler task failed");
                }
            }
            info!("Sync scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = self.settings.sync_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut connectivity = self.connectivity.clone();
        let mut phase = LinkPhase::of(&connectivity.borrow_and_update());
        let kick = self.queue.sync_requested();

        // Writes restored from a previous run go out without waiting a tick
        if phase.is_online() && !self.queue.is_empty() {
            debug!(reason = "startup", "Sync triggered");
            self.sync().await;
        }

        loop {
            let reason = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sync scheduler received shutdown");
                    break;
                }

                _ = ticker.tick() => "interval",

                changed = connectivity.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity source closed, scheduler exiting");
                        break;
                    }
                    let next = LinkPhase::of(&connectivity.borrow_and_update());
                    let transition = phase.transition(next);
                    phase = next;
                    if !transition.came_online() {
                        continue;
                    }
                    "reconnected"
                }

                _ = kick.notified() => "enqueued",
            };

            if self.queue.is_empty() || !self.is_online() {
                continue;
            }

            debug!(reason, "Sync triggered");
            self.sync().await;
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{GuardSettings, ProbeSettings, StoreSettings};
    use crate::link::ManualLinkMonitor;
    use crate::prober::ReachabilityProber;
    use crate::storage::MemoryStorage;
    use crate::store::NetworkStateStore;
    use crate::testing::{RecordingExecutor, ScriptedProbe};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;
    use tether_core::{OperationType, RawLinkState, Reachability};

    struct Fixture {
        link: Arc<ManualLinkMonitor>,
        clock: Arc<ManualClock>,
        store: Arc<NetworkStateStore>,
        queue: Arc<PendingQueue>,
        executor: Arc<RecordingExecutor>,
        scheduler: Arc<SyncScheduler>,
    }

    async fn fixture(raw: RawLinkState) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let link = Arc::new(ManualLinkMonitor::new(raw));
        let storage = Arc::new(MemoryStorage::new());
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
        store.initialize().await;

        let queue = Arc::new(PendingQueue::new(storage, clock.clone(), store.watch()));
        let executor = Arc::new(RecordingExecutor::new());
        let scheduler = SyncScheduler::new(
            QueueSettings::default(),
            queue.clone(),
            TimeoutGuard::new(store.clone(), &GuardSettings::default()),
            executor.clone(),
            store.watch(),
            clock.clone(),
        );

        Fixture {
            link,
            clock,
            store,
            queue,
            executor,
            scheduler,
        }
    }

    async fn enqueue(f: &Fixture, entity: &str, n: u32) {
        f.queue
            .enqueue(OperationType::Update, entity, json!({ "n": n }))
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::milliseconds(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_replays_in_order() {
        let f = fixture(RawLinkState::wifi(Reachability::Reachable)).await;
        enqueue(&f, "note", 1).await;
        enqueue(&f, "chat", 2).await;

        let report = f.scheduler.sync().await;

        assert_eq!(report.succeeded, 2);
        assert!(f.queue.is_empty());
        let payloads: Vec<_> = f
            .executor
            .calls()
            .into_iter()
            .map(|op| op.payload["n"].clone())
            .collect();
        assert_eq!(payloads, vec![json!(1), json!(2)]);

        let status = f.scheduler.status().await;
        assert!(!status.in_flight);
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.last_sync_at, Some(f.clock.now()));
        f.store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_entity_defers_later_writes() {
        let f = fixture(RawLinkState::wifi(Reachability::Reachable)).await;
        enqueue(&f, "note", 1).await;
        enqueue(&f, "note", 2).await;
        enqueue(&f, "chat", 3).await;

        f.executor.fail_entity("note", true);
        let report = f.scheduler.sync().await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.succeeded, 1);

        let pending = f.queue.get_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(pending[1].retry_count, 0);

        let status = f.scheduler.status().await;
        assert!(status.last_error.is_some());
        f.store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_sync_attempts_nothing() {
        let f = fixture(RawLinkState::disconnected()).await;
        enqueue(&f, "note", 1).await;

        let report = f.scheduler.sync().await;

        assert!(report.aborted_offline);
        assert_eq!(report.attempted, 0);
        assert_eq!(f.executor.call_count(), 0);
        assert_eq!(f.queue.get_pending()[0].retry_count, 0);
        f.store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_mid_pass_abandons_the_rest() {
        let f = fixture(RawLinkState::wifi(Reachability::Reachable)).await;
        enqueue(&f, "a", 1).await;
        enqueue(&f, "b", 2).await;
        enqueue(&f, "c", 3).await;
        f.executor.set_latency(Duration::from_secs(1));

        let pass = tokio::spawn({
            let scheduler = f.scheduler.clone();
            async move { scheduler.sync().await }
        });

        // The first write is in the executor when the link drops
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.executor.call_count(), 1);
        f.link.publish(RawLinkState::disconnected());

        let report = pass.await.unwrap();

        assert!(report.aborted_offline);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        let called: Vec<_> = f.executor.calls().into_iter().map(|op| op.entity).collect();
        assert_eq!(called, vec!["a"]);

        let pending = f.queue.get_pending();
        let left: Vec<_> = pending.iter().map(|op| op.entity.as_str()).collect();
        assert_eq!(left, vec!["b", "c"]);
        assert!(pending.iter().all(|op| op.retry_count == 0));
        f.store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sync_is_skipped() {
        let f = fixture(RawLinkState::wifi(Reachability::Reachable)).await;
        enqueue(&f, "note", 1).await;
        f.executor.set_latency(Duration::from_secs(1));

        let (first, second) = tokio::join!(f.scheduler.sync(), f.scheduler.sync());

        assert_eq!(first.succeeded, 1);
        assert!(second.skipped_in_flight);
        assert_eq!(f.executor.call_count(), 1);
        f.store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_drains_queue() {
        let f = fixture(RawLinkState::wifi(Reachability::Reachable)).await;
        f.scheduler.start();
        f.scheduler.start();

        enqueue(&f, "note", 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Enqueue while online kicks a pass right away
        assert_eq!(f.executor.call_count(), 1);

        f.executor.set_failing(true);
        enqueue(&f, "note", 2).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.executor.call_count(), 2);

        f.executor.set_failing(false);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.executor.call_count(), 3);
        assert!(f.queue.is_empty());

        f.scheduler.stop().await;
        f.scheduler.stop().await;
        assert!(!f.scheduler.is_running());
        f.store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_sync() {
        let f = fixture(RawLinkState::disconnected()).await;
        f.scheduler.start();
        enqueue(&f, "note", 1).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.executor.call_count(), 0);

        f.link.publish(RawLinkState::wifi(Reachability::Reachable));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.executor.call_count(), 1);
        assert!(f.queue.is_empty());
        f.scheduler.stop().await;
        f.store.teardown().await;
    }
}
