//! # Network State Store
//!
//! Single writer and owner of the process-wide `NetworkState`.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      NetworkStateStore                                  │
//! │                                                                         │
//! │  LinkMonitor events ──► debounce ──┐                                   │
//! │    100ms isolated                   │                                   │
//! │    500ms if previous event < 1s ago │                                   │
//! │                                     ▼                                   │
//! │  refresh() ────────────────► classify(raw, failures) ──► commit        │
//! │                                     │                      │            │
//! │                      ambiguous? ────┘                      │            │
//! │                      prober.trigger()                      │            │
//! │                                                            │            │
//! │  Prober outcomes ──► apply_probe ──────────────────────────┤            │
//! │  Guard failures  ──► record_failure ───────────────────────┤            │
//! │                                                            ▼            │
//! │                      ┌─────────────────────────────────────────────┐   │
//! │                      │ commit:                                     │   │
//! │                      │  1. replace state (watch channel)           │   │
//! │                      │  2. log phase transition                    │   │
//! │                      │  3. persistence task saves latest (async)   │   │
//! │                      │  4. unlock, notify listeners (sync, ordered)│   │
//! │                      └─────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Probe Verdicts
//! - Probe success while the link is up but the state says unusable:
//!   flip `effectively_connected` back to `true`.
//! - Consecutive failures reaching the transport threshold (1 cellular,
//!   2 otherwise): flip it to `false`.
//! - The next raw event reclassifies from scratch with the current counter.
//!
//! ## Listener Rules
//! Listeners run after the commit lock is released, so they may subscribe,
//! unsubscribe or trigger another commit (a guarded call that fails, for
//! instance). Each change carries a revision; once a newer change commits,
//! the round delivering the older one stops and the remaining listeners
//! only hear the newer state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use tether_core::classify::exceeds_threshold;
use tether_core::validation::validate_network_state;
use tether_core::{
    classify, failure_threshold, Classification, ConnectionType, LinkPhase, NetworkState,
    RawLinkState,
};

use crate::clock::Clock;
use crate::config::StoreSettings;
use crate::link::LinkMonitor;
use crate::listeners::{Listeners, Subscription};
use crate::prober::{ProbeOutcome, ProbeSink, ReachabilityProber};
use crate::storage::StateStorage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of the classified connectivity state.
pub struct NetworkStateStore {
    settings: StoreSettings,
    link: Arc<dyn LinkMonitor>,
    prober: Arc<ReachabilityProber>,
    storage: Arc<dyn StateStorage>,
    clock: Arc<dyn Clock>,

    state_tx: watch::Sender<NetworkState>,
    listeners: Listeners,
    phase: Mutex<LinkPhase>,
    commit_lock: Mutex<()>,
    /// Bumped on every change listeners hear about.
    revision: AtomicU64,

    initialized: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkStateStore {
    /// Creates a store holding optimistic defaults.
    ///
    /// Nothing runs until [`initialize`](Self::initialize).
    pub fn new(
        settings: StoreSettings,
        link: Arc<dyn LinkMonitor>,
        prober: Arc<ReachabilityProber>,
        storage: Arc<dyn StateStorage>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(NetworkState::optimistic(clock.now()));

        Arc::new(NetworkStateStore {
            settings,
            link,
            prober,
            storage,
            clock,
            state_tx,
            listeners: Listeners::new(),
            phase: Mutex::new(LinkPhase::Unknown),
            commit_lock: Mutex::new(()),
            revision: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restores persisted state, classifies the current link, and starts
    /// the link watcher, the persistence task and the prober loop.
    ///
    /// Calling it again while initialized returns the current state.
    pub async fn initialize(self: &Arc<Self>) -> NetworkState {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.get_state();
        }

        info!("Initializing network state store");

        self.restore_persisted().await;

        // Subscribe before fetching so no event between the two is lost
        let persist_rx = self.state_tx.subscribe();
        let link_rx = self.link.subscribe();

        let raw = self.link.fetch().await;
        self.apply_raw(raw, "initial fetch");

        let link_task = tokio::spawn(watch_link(
            Arc::downgrade(self),
            link_rx,
            self.settings.clone(),
        ));
        let persist_task = tokio::spawn(persist_changes(Arc::clone(&self.storage), persist_rx));
        lock(&self.tasks).extend([link_task, persist_task]);

        let sink: Arc<dyn ProbeSink> = self.clone();
        self.prober.start_periodic(Arc::downgrade(&sink));

        let state = self.get_state();
        info!(
            connected = state.effectively_connected,
            connection = %state.connection_type,
            "Network state store initialized"
        );
        state
    }

    /// Stops the link watcher, the persistence task and the prober, then
    /// writes the final state once. Idempotent.
    pub async fn teardown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.abort();
        }
        self.prober.stop();

        let state = self.get_state();
        if let Err(e) = self.storage.save_state(&state).await {
            warn!(error = %e, "Failed to persist final network state");
        }

        info!("Network state store torn down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current state (synchronous, cached).
    pub fn get_state(&self) -> NetworkState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every committed state.
    pub fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    /// Current coarse phase.
    pub fn phase(&self) -> LinkPhase {
        *lock(&self.phase)
    }

    pub fn prober(&self) -> &Arc<ReachabilityProber> {
        &self.prober
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Registers `listener`, calls it immediately with the current state,
    /// then again on every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let (subscription, revision, current) = {
            let _commit = lock(&self.commit_lock);
            let subscription = self.listeners.insert(listener);
            let revision = self.revision.load(Ordering::SeqCst);
            (subscription, revision, self.state_tx.borrow().clone())
        };

        // A newer commit has already delivered its state to this listener
        if self.revision.load(Ordering::SeqCst) == revision {
            self.listeners.notify_one(&subscription, &current);
        }

        subscription
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Fetches the raw link state and reclassifies now, bypassing debounce.
    pub async fn refresh(&self) -> NetworkState {
        let raw = self.link.fetch().await;
        self.apply_raw(raw, "refresh");
        self.get_state()
    }

    /// Counts one failed real call against the prober's counter and
    /// demotes the state if that reaches the threshold.
    ///
    /// Returns the new consecutive-failure count.
    pub fn record_failure(&self) -> u32 {
        let failures = self.prober.failures().increment();
        self.demote_after_failures(failures, "guarded call failed");
        failures
    }

    fn apply_raw(&self, raw: RawLinkState, cause: &'static str) {
        let failures = self.prober.failures().get();
        let Classification { state, probe } = classify(&raw, failures, self.clock.now());

        self.commit(state, cause);

        if let Some(reason) = probe {
            debug!(?reason, failures, "Ambiguous reachability, probing now");
            self.prober.trigger();
        }
    }

    fn demote_after_failures(&self, failures: u32, cause: &'static str) {
        let now = self.clock.now();
        self.update(cause, |current| {
            if !current.effectively_connected
                || !exceeds_threshold(current.connection_type, failures)
            {
                return None;
            }

            warn!(
                failures,
                threshold = failure_threshold(current.connection_type),
                connection = %current.connection_type,
                "Consecutive failures reached threshold, marking offline"
            );

            Some(NetworkState {
                effectively_connected: false,
                last_checked: now,
                ..current.clone()
            })
        });
    }

    async fn restore_persisted(&self) {
        match self.storage.load_state().await {
            Ok(Some(state)) => {
                let now = self.clock.now();
                if !state.is_fresh(now, self.settings.freshness()) {
                    debug!(
                        last_checked = %state.last_checked,
                        "Discarding stale persisted network state"
                    );
                    return;
                }
                if let Err(e) = validate_network_state(&state) {
                    warn!(error = %e, "Discarding invalid persisted network state");
                    return;
                }
                debug!(last_checked = %state.last_checked, "Restored persisted network state");
                self.commit(state, "restored");
            }
            Ok(None) => debug!("No persisted network state"),
            Err(e) => warn!(error = %e, "Failed to load persisted network state"),
        }
    }

    fn commit(&self, next: NetworkState, cause: &'static str) {
        let change = {
            let _commit = lock(&self.commit_lock);
            self.commit_locked(next, cause)
        };
        self.publish(change);
    }

    fn update<F>(&self, cause: &'static str, f: F)
    where
        F: FnOnce(&NetworkState) -> Option<NetworkState>,
    {
        let change = {
            let _commit = lock(&self.commit_lock);
            let current = self.state_tx.borrow().clone();
            f(&current).and_then(|next| self.commit_locked(next, cause))
        };
        self.publish(change);
    }

    /// Replaces the state. Returns the revision and state listeners must
    /// hear about, or `None` for a re-confirmation.
    fn commit_locked(
        &self,
        next: NetworkState,
        cause: &'static str,
    ) -> Option<(u64, NetworkState)> {
        debug_assert!(next.is_consistent(), "effectively connected without a link");

        let previous = self.state_tx.send_replace(next.clone());

        let transition = {
            let mut phase = lock(&self.phase);
            let transition = phase.transition(LinkPhase::of(&next));
            *phase = transition.to;
            transition
        };

        if transition.is_change() {
            info!(
                from = %transition.from,
                to = %transition.to,
                connection = %next.connection_type,
                reachability = %next.is_internet_reachable,
                cause,
                "Connectivity changed"
            );
        }

        if next.differs_from(&previous) {
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            Some((revision, next))
        } else {
            trace!(cause, "State re-confirmed");
            None
        }
    }

    fn publish(&self, change: Option<(u64, NetworkState)>) {
        let Some((revision, state)) = change else {
            return;
        };
        self.listeners.notify(&state, || self.revision.load(Ordering::SeqCst) == revision);
    }
}

impl ProbeSink for NetworkStateStore {
    fn connection_type(&self) -> ConnectionType {
        self.state_tx.borrow().connection_type
    }

    fn apply_probe(&self, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Reachable { endpoint } => {
                let now = self.clock.now();
                self.update("probe succeeded", |current| {
                    if !current.is_connected || current.effectively_connected {
                        return None;
                    }
                    info!(endpoint = %endpoint, "Probe succeeded, restoring connectivity");
                    Some(NetworkState {
                        effectively_connected: true,
                        last_checked: now,
                        ..current.clone()
                    })
                });
            }
            ProbeOutcome::Unreachable { failures } => {
                self.demote_after_failures(*failures, "probe failed");
            }
        }
    }
}

impl std::fmt::Debug for NetworkStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStateStore")
            .field("state", &*self.state_tx.borrow())
            .field("initialized", &self.is_initialized())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl Drop for NetworkStateStore {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.prober.stop();
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Debounces raw link events into `apply_raw` calls.
///
/// An event arriving within `flap_window` of the previous one waits
/// `flap_debounce`; an isolated event waits `debounce`. Every new event
/// restarts the wait, so only the last event of a burst is applied.
async fn watch_link(
    store: Weak<NetworkStateStore>,
    mut events: broadcast::Receiver<RawLinkState>,
    settings: StoreSettings,
) {
    let mut last_event: Option<Instant> = None;
    let mut pending: Option<(RawLinkState, Instant)> = None;

    loop {
        let due = pending.map(|(_, at)| at);

        tokio::select! {
            event = events.recv() => match event {
                Ok(raw) => {
                    let now = Instant::now();
                    let flapping = last_event.is_some_and(|previous| {
                        now.duration_since(previous) < settings.flap_window()
                    });
                    let delay = if flapping {
                        settings.flap_debounce()
                    } else {
                        settings.debounce()
                    };

                    trace!(
                        connected = raw.is_connected,
                        flapping,
                        delay_ms = delay.as_millis() as u64,
                        "Link event"
                    );
                    last_event = Some(now);
                    pending = Some((raw, now + delay));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Link watcher lagged behind events");
                }
                Err(RecvError::Closed) => {
                    debug!("Link monitor closed");
                    if let (Some((raw, _)), Some(store)) = (pending.take(), store.upgrade()) {
                        store.apply_raw(raw, "link change");
                    }
                    break;
                }
            },

            _ = sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                let Some((raw, _)) = pending.take() else { continue };
                let Some(store) = store.upgrade() else { break };
                store.apply_raw(raw, "link change");
            }
        }
    }
}

/// Saves the latest committed state whenever it changes.
///
/// Bursts of commits coalesce: only the newest value is written.
async fn persist_changes(
    storage: Arc<dyn StateStorage>,
    mut states: watch::Receiver<NetworkState>,
) {
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        if let Err(e) = storage.save_state(&state).await {
            warn!(error = %e, "Failed to persist network state");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
