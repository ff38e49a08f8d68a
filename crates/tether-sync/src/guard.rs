//! # Timeout Guard
//!
//! Wraps network-bound futures so they fail fast when offline and never
//! outlive a deadline.
//!
//! ```text
//! run(op, timeout, fallback)
//!   │
//!   ├─ store offline? ──► fallback ? Ok(fallback) : Err(NetworkUnavailable)
//!   │                     (op never invoked)
//!   │
//!   ├─ cellular? deadline = min(timeout, cellular_ceiling)
//!   │
//!   └─ race op against deadline
//!        ├─ Ok(v)       ──► Ok(v)
//!        ├─ Err(e)      ──► record failure (cellular) ──► Err(Operation(e))
//!        └─ deadline    ──► record failure (cellular) ──► Err(TimedOut)
//! ```
//!
//! A timed-out future is dropped; work it already handed to another task
//! is not cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::GuardSettings;
use crate::store::NetworkStateStore;

/// Failure of a guarded call.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The store reported no usable connectivity and no fallback was given.
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// The deadline elapsed first.
    #[error("Operation timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The operation itself failed.
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    /// Returns true if the call never left the device.
    pub fn is_network_unavailable(&self) -> bool {
        matches!(self, GuardError::NetworkUnavailable)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GuardError::TimedOut { .. })
    }
}

/// Fail-fast, deadline-bounded runner for network calls.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    store: Arc<NetworkStateStore>,
    cellular_ceiling: Duration,
}

impl TimeoutGuard {
    pub fn new(store: Arc<NetworkStateStore>, settings: &GuardSettings) -> Self {
        TimeoutGuard {
            store,
            cellular_ceiling: settings.cellular_ceiling(),
        }
    }

    /// Runs `op` under the connectivity gate and a deadline.
    ///
    /// `op` is only called when the store reports effective connectivity.
    pub async fn run<T, E, F, Fut>(
        &self,
        op: F,
        timeout: Duration,
        fallback: Option<T>,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let state = self.store.get_state();
        if !state.effectively_connected {
            debug!(
                connection = %state.connection_type,
                has_fallback = fallback.is_some(),
                "Offline, skipping guarded call"
            );
            return fallback.ok_or(GuardError::NetworkUnavailable);
        }

        let cellular = state.connection_type.is_cellular();
        let deadline = if cellular {
            timeout.min(self.cellular_ceiling)
        } else {
            timeout
        };

        match tokio::time::timeout(deadline, op()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if cellular {
                    self.record_cellular_failure("error");
                }
                Err(GuardError::Operation(e))
            }
            Err(_) => {
                if cellular {
                    self.record_cellular_failure("timeout");
                }
                debug!(after_ms = deadline.as_millis() as u64, "Guarded call timed out");
                Err(GuardError::TimedOut { after: deadline })
            }
        }
    }

    fn record_cellular_failure(&self, kind: &'static str) {
        let failures = self.store.record_failure();
        debug!(kind, failures, "Cellular call failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{ProbeSettings, StoreSettings};
    use crate::link::ManualLinkMonitor;
    use crate::prober::ReachabilityProber;
    use crate::storage::MemoryStorage;
    use crate::testing::ScriptedProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_core::{CellularGeneration, RawLinkState, Reachability};

    async fn guard_on(raw: RawLinkState) -> (TimeoutGuard, Arc<NetworkStateStore>) {
        let prober = Arc::new(
            ReachabilityProber::new(ProbeSettings::default(), Arc::new(ScriptedProbe::reachable()))
                .unwrap(),
        );
        let store = NetworkStateStore::new(
            StoreSettings::default(),
            Arc::new(ManualLinkMonitor::new(raw)),
            prober,
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
        );
        store.initialize().await;
        (TimeoutGuard::new(store.clone(), &GuardSettings::default()), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_never_invokes_op() {
        let (guard, store) = guard_on(RawLinkState::disconnected()).await;
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let result: Result<u32, GuardError<String>> = guard
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
                Duration::from_secs(1),
                None,
            )
            .await;

        assert!(result.unwrap_err().is_network_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_returns_fallback() {
        let (guard, store) = guard_on(RawLinkState::disconnected()).await;

        let result: Result<&str, GuardError<String>> = guard
            .run(|| async { Ok("live") }, Duration::from_secs(1), Some("cached"))
            .await;

        assert_eq!(result.unwrap(), "cached");
        store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let (guard, store) = guard_on(RawLinkState::wifi(Reachability::Reachable)).await;

        let result: Result<(), GuardError<String>> = guard
            .run(
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                Duration::from_secs(2),
                None,
            )
            .await;

        match result {
            Err(GuardError::TimedOut { after }) => assert_eq!(after, Duration::from_secs(2)),
            other => panic!("expected timeout, got {other:?}"),
        }
        // Wi-Fi timeouts are not counted against the link
        assert!(store.get_state().effectively_connected);
        store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cellular_deadline_is_capped() {
        let raw = RawLinkState::cellular(Reachability::Reachable, Some(CellularGeneration::G4));
        let (guard, store) = guard_on(raw).await;

        let result: Result<(), GuardError<String>> = guard
            .run(
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                Duration::from_secs(30),
                None,
            )
            .await;

        match result {
            Err(GuardError::TimedOut { after }) => assert_eq!(after, Duration::from_secs(5)),
            other => panic!("expected timeout, got {other:?}"),
        }
        // The timeout counts against the cellular link at once
        assert_eq!(store.prober().failures().get(), 1);
        assert!(!store.get_state().effectively_connected);
        assert!(store.get_state().is_connected);
        store.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_cellular_failure_marks_offline() {
        let raw = RawLinkState::cellular(Reachability::Reachable, Some(CellularGeneration::G4));
        let (guard, store) = guard_on(raw).await;

        let result: Result<(), GuardError<String>> = guard
            .run(|| async { Err("reset".to_string()) }, Duration::from_secs(5), None)
            .await;

        assert!(matches!(result, Err(GuardError::Operation(ref e)) if e == "reset"));
        assert!(!store.get_state().effectively_connected);
        assert!(store.get_state().is_connected);

        // The next call fails fast
        let next: Result<(), GuardError<String>> = guard
            .run(|| async { Ok(()) }, Duration::from_secs(5), None)
            .await;
        assert!(next.unwrap_err().is_network_unavailable());
        store.teardown().await;
    }
}
