//! # Pending Queue
//!
//! Durable, ordered list of writes that could not be applied immediately.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue(type, entity, payload)                                         │
//! │     │  validate entity                                                  │
//! │     │  id = uuid v4, enqueued_at = now, retry_count = 0                 │
//! │     ▼                                                                   │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  entries (ordered by enqueued_at, ties keep insertion order)    │   │
//! │  └──────────────┬───────────────────────────────┬──────────────────┘   │
//! │                 │ executor Ok                   │ executor Err         │
//! │                 ▼                               ▼                      │
//! │            remove(id)                 retry_count += 1                 │
//! │                                          │                             │
//! │                          retry_count >= max_retries ?                  │
//! │                             yes: drop   no: keep for next pass         │
//! │                                                                         │
//! │  Every mutation rewrites the persisted list (best effort).             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Restore
//! - Record decodes: merged into memory.
//! - Record corrupt: replaced with the current (usually empty) list at once.
//! - Record unreadable (locked, I/O): nothing is written until a later load
//!   succeeds, so writes queued by earlier runs are never overwritten. Each
//!   mutation retries the load first and keeps running in memory meanwhile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use tether_core::validation::validate_entity;
use tether_core::{NetworkState, OperationType, PendingOperation};

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::storage::StateStorage;

/// What happened to an entry after a failed replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Kept for the next pass.
    Retained { retry_count: u32 },
    /// Removed after exhausting its attempts.
    Dropped { retry_count: u32 },
}

/// Result of reading the persisted list.
enum Restore {
    Merged(usize),
    Corrupt,
    Unreadable,
}

/// Durable write-behind queue.
pub struct PendingQueue {
    entries: Mutex<Vec<PendingOperation>>,
    persist_lock: tokio::sync::Mutex<()>,
    /// The persisted list could not be read; do not overwrite it.
    restore_pending: AtomicBool,
    storage: Arc<dyn StateStorage>,
    clock: Arc<dyn Clock>,
    connectivity: watch::Receiver<NetworkState>,
    sync_requested: Arc<Notify>,
}

impl PendingQueue {
    /// Creates an empty queue. Call [`restore`](Self::restore) to load the
    /// persisted entries.
    pub fn new(
        storage: Arc<dyn StateStorage>,
        clock: Arc<dyn Clock>,
        connectivity: watch::Receiver<NetworkState>,
    ) -> Self {
        PendingQueue {
            entries: Mutex::new(Vec::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            restore_pending: AtomicBool::new(false),
            storage,
            clock,
            connectivity,
            sync_requested: Arc::new(Notify::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<PendingOperation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads persisted entries, skipping ids already queued.
    ///
    /// Must run before the first `enqueue`, which rewrites the persisted
    /// list. A corrupt record is replaced right away; an unreadable one is
    /// left untouched and retried on the next mutation.
    pub async fn restore(&self) -> usize {
        let _persist = self.persist_lock.lock().await;
        match self.load_persisted().await {
            Restore::Merged(restored) => restored,
            Restore::Corrupt => {
                self.save_locked().await;
                0
            }
            Restore::Unreadable => 0,
        }
    }

    /// Returns true while the persisted list is known but unread.
    pub fn is_restore_pending(&self) -> bool {
        self.restore_pending.load(Ordering::SeqCst)
    }

    async fn load_persisted(&self) -> Restore {
        let persisted = match self.storage.load_queue().await {
            Ok(persisted) => persisted,
            Err(SyncError::Serialization(reason)) => {
                warn!(error = %reason, "Pending queue record is corrupt, replacing it");
                self.restore_pending.store(false, Ordering::SeqCst);
                return Restore::Corrupt;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to load pending queue, will retry before overwriting"
                );
                self.restore_pending.store(true, Ordering::SeqCst);
                return Restore::Unreadable;
            }
        };
        self.restore_pending.store(false, Ordering::SeqCst);

        let restored = {
            let mut entries = self.entries();
            let mut merged: Vec<PendingOperation> = persisted
                .into_iter()
                .filter(|op| !entries.iter().any(|existing| existing.id == op.id))
                .collect();
            let restored = merged.len();
            merged.append(&mut entries);
            merged.sort_by_key(|op| op.enqueued_at);
            *entries = merged;
            restored
        };

        if restored > 0 {
            info!(count = restored, "Restored pending operations");
        }
        Restore::Merged(restored)
    }

    /// Appends a write and persists the queue.
    ///
    /// Returns the new entry's id. Fails only on an invalid entity name.
    pub async fn enqueue(
        &self,
        op_type: OperationType,
        entity: &str,
        payload: serde_json::Value,
    ) -> SyncResult<String> {
        validate_entity(entity)?;

        let op = PendingOperation::new(op_type, entity.trim(), payload, self.clock.now());
        let id = op.id.clone();

        let pending = {
            let mut entries = self.entries();
            entries.push(op);
            entries.len()
        };
        debug!(
            id = %id,
            op_type = %op_type,
            entity = entity.trim(),
            pending,
            "Enqueued operation"
        );

        self.persist().await;

        if self.connectivity.borrow().effectively_connected {
            self.sync_requested.notify_one();
        }

        Ok(id)
    }

    /// Snapshot of the queue in replay order.
    pub fn get_pending(&self) -> Vec<PendingOperation> {
        let mut snapshot = self.entries().clone();
        snapshot.sort_by_key(|op| op.enqueued_at);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Removes every entry and persists the empty list.
    pub async fn clear(&self) {
        let cleared = std::mem::take(&mut *self.entries()).len();
        info!(count = cleared, "Cleared pending queue");
        self.persist().await;
    }

    /// Removes a replayed entry.
    pub(crate) async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|op| op.id != id);
            entries.len() != before
        };

        if removed {
            self.persist().await;
        }
        removed
    }

    /// Counts one failed replay of `id`, dropping it once it has failed
    /// `max_retries` times. `None` if the entry is gone.
    pub(crate) async fn record_failure(&self, id: &str, max_retries: u32) -> Option<RetryVerdict> {
        let verdict = {
            let mut entries = self.entries();
            let index = entries.iter().position(|op| op.id == id)?;

            entries[index].retry_count += 1;
            let retry_count = entries[index].retry_count;

            if retry_count >= max_retries {
                let dropped = entries.remove(index);
                warn!(
                    id = %dropped.id,
                    entity = %dropped.entity,
                    op_type = %dropped.op_type,
                    retry_count,
                    "Dropping operation after max retries"
                );
                RetryVerdict::Dropped { retry_count }
            } else {
                RetryVerdict::Retained { retry_count }
            }
        };

        self.persist().await;
        Some(verdict)
    }

    /// Wakes the scheduler when an entry is enqueued while online.
    pub(crate) fn sync_requested(&self) -> Arc<Notify> {
        Arc::clone(&self.sync_requested)
    }

    async fn persist(&self) {
        let _persist = self.persist_lock.lock().await;

        if self.is_restore_pending() {
            if let Restore::Unreadable = self.load_persisted().await {
                debug!(pending = self.len(), "Persisted queue still unreadable, not overwriting");
                return;
            }
        }
        self.save_locked().await;
    }

    /// Writes the current list. Caller holds `persist_lock`.
    async fn save_locked(&self) {
        // Snapshot under the lock so the last write always carries the
        // newest list
        let snapshot = self.get_pending();

        if let Err(e) = self.storage.save_queue(&snapshot).await {
            warn!(error = %e, count = snapshot.len(), "Failed to persist pending queue");
        }
    }
}

impl std::fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.len())
            .finish()
    }
}
