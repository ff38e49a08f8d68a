//! Test doubles for the probe transport and the operation executor.
//!
//! Used by this crate's tests and available to embedders that want to
//! exercise their wiring without a network.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

use tether_core::PendingOperation;

use crate::prober::{ProbeError, ProbeTransport};
use crate::scheduler::{ExecutorError, OperationExecutor};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Scripted Probe
// =============================================================================

/// Probe transport with scripted per-endpoint outcomes and a call log.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    all_down: AtomicBool,
    down: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    /// Every endpoint answers.
    pub fn reachable() -> Self {
        Self::default()
    }

    /// No endpoint answers.
    pub fn unreachable() -> Self {
        let probe = Self::default();
        probe.set_reachable(false);
        probe
    }

    /// Switches every endpoint up or down.
    pub fn set_reachable(&self, reachable: bool) {
        self.all_down.store(!reachable, Ordering::SeqCst);
    }

    /// Marks one endpoint down (or back up).
    pub fn set_endpoint_down(&self, endpoint: &str, down: bool) {
        let mut set = lock(&self.down);
        if down {
            set.insert(endpoint.to_string());
        } else {
            set.remove(endpoint);
        }
    }

    /// Delay before every answer.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Number of probes issued.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Endpoints probed, in order.
    pub fn probed(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProbeTransport for ScriptedProbe {
    async fn probe(&self, endpoint: &Url) -> Result<(), ProbeError> {
        lock(&self.calls).push(endpoint.to_string());

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let down = self.all_down.load(Ordering::SeqCst)
            || lock(&self.down).contains(endpoint.as_str());
        if down {
            Err(ProbeError::failure(endpoint, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Recording Executor
// =============================================================================

/// Executor that records every call and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    failing: AtomicBool,
    failing_entities: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<PendingOperation>>,
}

impl RecordingExecutor {
    /// Executor that succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor that always fails.
    pub fn failing() -> Self {
        let executor = Self::default();
        executor.set_failing(true);
        executor
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails (or stops failing) every write to `entity`.
    pub fn fail_entity(&self, entity: &str, failing: bool) {
        let mut set = lock(&self.failing_entities);
        if failing {
            set.insert(entity.to_string());
        } else {
            set.remove(entity);
        }
    }

    /// Delay before every result.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Every operation received, in call order.
    pub fn calls(&self) -> Vec<PendingOperation> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl OperationExecutor for RecordingExecutor {
    async fn execute(&self, op: &PendingOperation) -> Result<(), ExecutorError> {
        lock(&self.calls).push(op.clone());

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failing = self.failing.load(Ordering::SeqCst)
            || lock(&self.failing_entities).contains(&op.entity);
        if failing {
            return Err(format!("scripted failure for {} {}", op.op_type, op.entity).into());
        }
        Ok(())
    }
}
