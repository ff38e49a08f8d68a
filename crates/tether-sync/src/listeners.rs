//! # State Listeners
//!
//! Publish/subscribe registry for `NetworkState` changes.
//!
//! ## Guarantees
//! - Listeners are called in registration order.
//! - Notification is synchronous: `notify` returns after every listener ran,
//!   or as soon as its round is superseded by a newer state.
//! - [`Subscription::unsubscribe`] is idempotent and safe to call from
//!   inside a listener. Once it returns, that listener is not called again.
//! - Dropping a `Subscription` does **not** unsubscribe; the listener stays
//!   registered for the life of the registry.
//!
//! Listeners run on the notifying task. They should hand work off
//! (spawn, send on a channel) rather than block.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::trace;

use tether_core::NetworkState;

type Listener = Arc<dyn Fn(&NetworkState) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ordered set of state listeners.
#[derive(Clone, Default)]
pub struct Listeners {
    registry: Arc<Mutex<Registry>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` at the end of the notification order.
    pub fn insert<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(listener)));

        trace!(id, total = registry.entries.len(), "Listener registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Calls `listener` for one specific subscription.
    ///
    /// Used to deliver the current state to a fresh subscriber.
    pub(crate) fn notify_one(&self, subscription: &Subscription, state: &NetworkState) {
        let listener = lock(&self.registry)
            .entries
            .iter()
            .find(|(id, _)| *id == subscription.id)
            .map(|(_, l)| Arc::clone(l));

        if let Some(listener) = listener {
            listener(state);
        }
    }

    /// Calls every listener, in registration order, while `still_current`
    /// holds.
    ///
    /// `still_current` is checked before each call so a round superseded by
    /// a newer state (committed by a listener, or another task) stops early.
    pub fn notify<C>(&self, state: &NetworkState, still_current: C)
    where
        C: Fn() -> bool,
    {
        let mut index = 0;
        // Re-check the registry before each call so a listener removed by an
        // earlier one in the same round is skipped
        loop {
            if !still_current() {
                trace!("Notification superseded");
                break;
            }
            let next = {
                let registry = lock(&self.registry);
                registry.entries.get(index).map(|(id, l)| (*id, Arc::clone(l)))
            };
            let Some((id, listener)) = next else { break };

            listener(state);

            // Step past `id`, wherever removals during the call left it
            let registry = lock(&self.registry);
            index = match registry.entries.iter().position(|(other, _)| *other == id) {
                Some(position) => position + 1,
                None => registry
                    .entries
                    .iter()
                    .position(|(other, _)| *other > id)
                    .unwrap_or(registry.entries.len()),
            };
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Removes the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let mut registry = lock(&registry);
        let before = registry.entries.len();
        registry.entries.retain(|(id, _)| *id != self.id);

        if registry.entries.len() != before {
            trace!(id = self.id, "Listener removed");
        }
    }

    /// Returns true while the listener is registered.
    pub fn is_active(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let active = lock(&registry).entries.iter().any(|(id, _)| *id == self.id);
        active
    }
}
