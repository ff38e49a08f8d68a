//! # Connectivity Service
//!
//! Wires the store, prober, guard, queue and scheduler into one handle.
//!
//! ## Startup Order
//! ```text
//! ConnectivityBuilder::build()
//!   │  validate config, pick defaults for unset seams
//!   ▼
//! Connectivity::initialize()
//!   1. queue.restore()       persisted writes back in memory
//!   2. store.initialize()    restore state, classify link, start
//!                            link watcher + persister + prober
//!   3. scheduler.start()     interval / reconnect / enqueue triggers
//!
//! Connectivity::teardown()   reverse order, idempotent
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use tether_sync::{executor_fn, ConnectivityBuilder, ConnectivityConfig};
//! use tether_core::OperationType;
//!
//! # async fn run() -> tether_sync::SyncResult<()> {
//! let connectivity = ConnectivityBuilder::new(ConnectivityConfig::load_or_default(None))
//!     .with_executor(executor_fn(|op| async move {
//!         println!("replaying {} {}", op.op_type, op.entity);
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! connectivity.initialize().await;
//! connectivity
//!     .enqueue(OperationType::Create, "note", serde_json::json!({"title": "hi"}))
//!     .await?;
//! connectivity.teardown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use tether_core::{NetworkState, OperationType, PendingOperation};
use tether_db::Database;

use crate::clock::{Clock, SystemClock};
use crate::config::ConnectivityConfig;
use crate::error::{SyncError, SyncResult};
use crate::guard::TimeoutGuard;
use crate::link::{LinkMonitor, ManualLinkMonitor};
use crate::listeners::Subscription;
use crate::prober::{HttpProbe, ProbeTransport, ReachabilityProber};
use crate::queue::PendingQueue;
use crate::scheduler::{OperationExecutor, SyncReport, SyncScheduler, SyncStatus};
use crate::storage::{MemoryStorage, SqliteStorage, StateStorage};
use crate::store::NetworkStateStore;

// =============================================================================
// Connectivity
// =============================================================================

/// The assembled connectivity subsystem.
#[derive(Debug)]
pub struct Connectivity {
    store: Arc<NetworkStateStore>,
    guard: TimeoutGuard,
    queue: Arc<PendingQueue>,
    scheduler: Arc<SyncScheduler>,
    initialized: AtomicBool,
}

impl Connectivity {
    /// Starts every background task. Calling it again returns the current
    /// state.
    pub async fn initialize(&self) -> NetworkState {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.store.get_state();
        }

        let restored = self.queue.restore().await;
        let state = self.store.initialize().await;
        self.scheduler.start();

        info!(
            connected = state.effectively_connected,
            pending = restored,
            "Connectivity initialized"
        );
        state
    }

    /// Stops every background task. Idempotent.
    pub async fn teardown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }

        self.scheduler.stop().await;
        self.store.teardown().await;

        info!(pending = self.queue.len(), "Connectivity torn down");
    }

    // =========================================================================
    // Components
    // =========================================================================

    pub fn store(&self) -> &Arc<NetworkStateStore> {
        &self.store
    }

    pub fn guard(&self) -> &TimeoutGuard {
        &self.guard
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    // =========================================================================
    // Shortcuts
    // =========================================================================

    pub fn state(&self) -> NetworkState {
        self.store.get_state()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub async fn refresh(&self) -> NetworkState {
        self.store.refresh().await
    }

    pub async fn enqueue(
        &self,
        op_type: OperationType,
        entity: &str,
        payload: serde_json::Value,
    ) -> SyncResult<String> {
        self.queue.enqueue(op_type, entity, payload).await
    }

    pub fn pending(&self) -> Vec<PendingOperation> {
        self.queue.get_pending()
    }

    pub async fn sync(&self) -> SyncReport {
        self.scheduler.sync().await
    }

    pub async fn status(&self) -> SyncStatus {
        self.scheduler.status().await
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`Connectivity`].
///
/// Only the executor is required. Defaults: a [`ManualLinkMonitor`]
/// reporting Wi-Fi with unknown reachability, [`HttpProbe`],
/// [`MemoryStorage`], [`SystemClock`].
pub struct ConnectivityBuilder {
    config: ConnectivityConfig,
    link: Option<Arc<dyn LinkMonitor>>,
    probe: Option<Arc<dyn ProbeTransport>>,
    storage: Option<Arc<dyn StateStorage>>,
    clock: Option<Arc<dyn Clock>>,
    executor: Option<Arc<dyn OperationExecutor>>,
}

impl ConnectivityBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: ConnectivityConfig) -> Self {
        ConnectivityBuilder {
            config,
            link: None,
            probe: None,
            storage: None,
            clock: None,
            executor: None,
        }
    }

    /// Sets the platform link monitor.
    pub fn with_link_monitor(mut self, link: Arc<dyn LinkMonitor>) -> Self {
        self.link = Some(link);
        self
    }

    /// Sets the probe transport.
    pub fn with_probe(mut self, probe: Arc<dyn ProbeTransport>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sets the storage backend.
    pub fn with_storage(mut self, storage: Arc<dyn StateStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Persists to the `kv_store` table of `db`.
    pub fn with_database(self, db: Database) -> Self {
        self.with_storage(Arc::new(SqliteStorage::new(db)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the executor that replays queued writes.
    pub fn with_executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Builds the service. Nothing runs until `initialize`.
    pub fn build(self) -> SyncResult<Connectivity> {
        self.config.validate()?;

        let executor = self
            .executor
            .ok_or_else(|| SyncError::InvalidConfig("Executor required".into()))?;

        let probe: Arc<dyn ProbeTransport> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new(self.config.probe.deadline(false))?),
        };
        let link = self
            .link
            .unwrap_or_else(|| Arc::new(ManualLinkMonitor::default()));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let prober = Arc::new(ReachabilityProber::new(self.config.probe.clone(), probe)?);
        let store = NetworkStateStore::new(
            self.config.store.clone(),
            link,
            prober,
            Arc::clone(&storage),
            Arc::clone(&clock),
        );
        let guard = TimeoutGuard::new(Arc::clone(&store), &self.config.guard);
        let queue = Arc::new(PendingQueue::new(
            storage,
            Arc::clone(&clock),
            store.watch(),
        ));
        let scheduler = SyncScheduler::new(
            self.config.queue.clone(),
            Arc::clone(&queue),
            guard.clone(),
            executor,
            store.watch(),
            clock,
        );

        Ok(Connectivity {
            store,
            guard,
            queue,
            scheduler,
            initialized: AtomicBool::new(false),
        })
    }
}
