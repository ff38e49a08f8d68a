//! # State Storage
//!
//! Durable home of the two persisted records.
//!
//! ## Records
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key                          value                                     │
//! │  ───────────────────────────  ────────────────────────────────────────  │
//! │  tether.network_state         {"isConnected":true,...,"lastChecked":..} │
//! │  tether.pending_operations    [{"id":"..","type":"create",...}, ...]    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both records are rewritten whole on every mutation. Callers treat every
//! error from this module as best-effort: logged, never surfaced.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use tether_core::{NetworkState, PendingOperation};
use tether_db::{Database, DbError};

use crate::error::{SyncError, SyncResult};

/// Key of the persisted `NetworkState` record.
pub const NETWORK_STATE_KEY: &str = "tether.network_state";

/// Key of the persisted pending-operation list.
pub const PENDING_OPERATIONS_KEY: &str = "tether.pending_operations";

/// Durable storage for the connectivity records.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Loads the last persisted state, if any.
    async fn load_state(&self) -> SyncResult<Option<NetworkState>>;

    /// Replaces the persisted state.
    async fn save_state(&self, state: &NetworkState) -> SyncResult<()>;

    /// Loads the persisted queue (empty if none).
    ///
    /// A record that exists but no longer decodes is reported as
    /// [`SyncError::Serialization`]; every other error means the record
    /// could not be read right now.
    async fn load_queue(&self) -> SyncResult<Vec<PendingOperation>>;

    /// Replaces the persisted queue.
    async fn save_queue(&self, operations: &[PendingOperation]) -> SyncResult<()>;
}

// =============================================================================
// SQLite Storage
// =============================================================================

/// [`StateStorage`] backed by the `kv_store` table.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    pub fn new(db: Database) -> Self {
        SqliteStorage { db }
    }
}

#[async_trait]
impl StateStorage for SqliteStorage {
    async fn load_state(&self) -> SyncResult<Option<NetworkState>> {
        Ok(self.db.kv().get_json(NETWORK_STATE_KEY).await?)
    }

    async fn save_state(&self, state: &NetworkState) -> SyncResult<()> {
        Ok(self.db.kv().put_json(NETWORK_STATE_KEY, state).await?)
    }

    async fn load_queue(&self) -> SyncResult<Vec<PendingOperation>> {
        match self.db.kv().get_json(PENDING_OPERATIONS_KEY).await {
            Ok(Some(operations)) => Ok(operations),
            Ok(None) => Ok(Vec::new()),
            Err(DbError::CorruptValue { reason, .. }) => Err(SyncError::Serialization(reason)),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_queue(&self, operations: &[PendingOperation]) -> SyncResult<()> {
        debug!(count = operations.len(), "Persisting pending queue");
        Ok(self.db.kv().put_json(PENDING_OPERATIONS_KEY, operations).await?)
    }
}

// =============================================================================
// Memory Storage
// =============================================================================

/// In-process [`StateStorage`].
///
/// Used when no database is configured, and by tests, which can make
/// reads or writes fail with [`MemoryStorage::set_fail_reads`] and
/// [`MemoryStorage::set_fail_writes`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<Option<NetworkState>>,
    queue: Mutex<Vec<PendingOperation>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    state_writes: AtomicUsize,
    queue_writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a persisted state, as if written by an earlier run.
    pub fn with_state(self, state: NetworkState) -> Self {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
        self
    }

    /// Seeds a persisted queue, as if written by an earlier run.
    pub fn with_queue(self, operations: Vec<PendingOperation>) -> Self {
        *self.queue.lock().unwrap_or_else(|e| e.into_inner()) = operations;
        self
    }

    /// Makes every subsequent load fail, like a locked database file.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent save fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The last saved state.
    pub fn saved_state(&self) -> Option<NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The last saved queue.
    pub fn saved_queue(&self) -> Vec<PendingOperation> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of successful state saves.
    pub fn state_writes(&self) -> usize {
        self.state_writes.load(Ordering::SeqCst)
    }

    /// Number of successful queue saves.
    pub fn queue_writes(&self) -> usize {
        self.queue_writes.load(Ordering::SeqCst)
    }

    fn check_readable(&self) -> SyncResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("database is locked".into()));
        }
        Ok(())
    }

    fn check_writable(&self) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("storage is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    async fn load_state(&self) -> SyncResult<Option<NetworkState>> {
        self.check_readable()?;
        Ok(self.saved_state())
    }

    async fn save_state(&self, state: &NetworkState) -> SyncResult<()> {
        self.check_writable()?;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        self.state_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_queue(&self) -> SyncResult<Vec<PendingOperation>> {
        self.check_readable()?;
        Ok(self.saved_queue())
    }

    async fn save_queue(&self, operations: &[PendingOperation]) -> SyncResult<()> {
        self.check_writable()?;
        *self.queue.lock().unwrap_or_else(|e| e.into_inner()) = operations.to_vec();
        self.queue_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
