//! # Link Monitor
//!
//! Platform seam for raw link-state events.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OS link API (NetInfo, NWPathMonitor, netlink, ...)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  impl LinkMonitor                                                      │
//! │  ├── fetch()      → current RawLinkState        (used by refresh)      │
//! │  └── subscribe()  → broadcast::Receiver         (debounced by store)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ManualLinkMonitor`] is the in-process implementation: the embedding
//! application (or a test) pushes events with [`ManualLinkMonitor::publish`].

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

use tether_core::RawLinkState;

/// Buffered link events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 64;

/// Source of raw link-state snapshots and change events.
#[async_trait]
pub trait LinkMonitor: Send + Sync {
    /// Returns the current raw link state.
    async fn fetch(&self) -> RawLinkState;

    /// Subscribes to raw link-change events.
    fn subscribe(&self) -> broadcast::Receiver<RawLinkState>;
}

/// Link monitor driven by explicit [`publish`](Self::publish) calls.
#[derive(Debug)]
pub struct ManualLinkMonitor {
    current: Mutex<RawLinkState>,
    events: broadcast::Sender<RawLinkState>,
}

impl ManualLinkMonitor {
    /// Creates a monitor reporting `initial` until the first publish.
    pub fn new(initial: RawLinkState) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        ManualLinkMonitor {
            current: Mutex::new(initial),
            events,
        }
    }

    /// Records `raw` as current and broadcasts it to subscribers.
    pub fn publish(&self, raw: RawLinkState) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = raw;

        // No subscribers yet is fine: fetch() still sees the new value
        let receivers = self.events.send(raw).unwrap_or(0);
        trace!(receivers, connected = raw.is_connected, "Published link event");
    }

    /// Returns the last published state.
    pub fn current(&self) -> RawLinkState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualLinkMonitor {
    /// Link up, reachability unknown: probes decide.
    fn default() -> Self {
        ManualLinkMonitor::new(RawLinkState::wifi(tether_core::Reachability::Unknown))
    }
}

#[async_trait]
impl LinkMonitor for ManualLinkMonitor {
    async fn fetch(&self) -> RawLinkState {
        self.current()
    }

    fn subscribe(&self) -> broadcast::Receiver<RawLinkState> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Reachability;

    #[tokio::test]
    async fn test_publish_updates_fetch_and_subscribers() {
        let monitor = ManualLinkMonitor::default();
        let mut rx = monitor.subscribe();

        monitor.publish(RawLinkState::disconnected());

        assert_eq!(monitor.fetch().await, RawLinkState::disconnected());
        assert_eq!(rx.recv().await.unwrap(), RawLinkState::disconnected());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let monitor = ManualLinkMonitor::new(RawLinkState::disconnected());
        monitor.publish(RawLinkState::wifi(Reachability::Reachable));

        assert!(monitor.fetch().await.is_connected);
    }
}
