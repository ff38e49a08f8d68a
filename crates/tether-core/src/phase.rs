//! # Link Phase State Machine
//!
//! Coarse phase derived from a [`NetworkState`], used by the store to name
//! transitions and by the scheduler to spot offline→online edges.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Link Phases                                      │
//! │                                                                         │
//! │   ┌─────────┐  first classification   ┌───────────┐                    │
//! │   │ Unknown │ ──────────────────────► │ Connected │ ◄──┐               │
//! │   └─────────┘                          └─────┬─────┘    │               │
//! │                                              │          │ probe ok /    │
//! │                        probe failures ≥ N    │          │ reachable     │
//! │                        or unreachable        ▼          │               │
//! │                                        ┌───────────┐    │               │
//! │                                        │ Degraded  │ ───┘               │
//! │                                        └─────┬─────┘                    │
//! │                              link down       │                          │
//! │                                              ▼                          │
//! │                                       ┌──────────────┐                  │
//! │                                       │ Disconnected │ ── link up ──►   │
//! │                                       └──────────────┘   (re-classify)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `Connected`: `effectively_connected`
//! - `Degraded`: link up, but not usable
//! - `Disconnected`: link down

use crate::types::NetworkState;

/// Coarse connectivity phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// No classification has happened yet.
    #[default]
    Unknown,
    /// Usable internet access.
    Connected,
    /// Link is up but probes or the platform say it is not usable.
    Degraded,
    /// Link is down.
    Disconnected,
}

impl LinkPhase {
    /// Derives the phase of a classified state.
    pub fn of(state: &NetworkState) -> Self {
        if state.effectively_connected {
            LinkPhase::Connected
        } else if state.is_connected {
            LinkPhase::Degraded
        } else {
            LinkPhase::Disconnected
        }
    }

    /// Returns true if this phase allows outbound work.
    #[inline]
    pub fn is_online(&self) -> bool {
        matches!(self, LinkPhase::Connected)
    }

    /// Describes the move from `self` to `next`.
    pub fn transition(self, next: LinkPhase) -> PhaseTransition {
        PhaseTransition { from: self, to: next }
    }
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkPhase::Unknown => write!(f, "unknown"),
            LinkPhase::Connected => write!(f, "connected"),
            LinkPhase::Degraded => write!(f, "degraded"),
            LinkPhase::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A move between two phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: LinkPhase,
    pub to: LinkPhase,
}

impl PhaseTransition {
    /// Returns true if the phase actually changed.
    #[inline]
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }

    /// Offline (degraded or disconnected) → connected.
    ///
    /// `Unknown → Connected` is not a recovery: nothing was offline.
    pub fn came_online(&self) -> bool {
        matches!(self.from, LinkPhase::Degraded | LinkPhase::Disconnected)
            && self.to.is_online()
    }

    /// Connected → degraded or disconnected.
    pub fn went_offline(&self) -> bool {
        self.from.is_online() && !self.to.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(is_connected: bool, effectively_connected: bool) -> NetworkState {
        NetworkState {
            is_connected,
            effectively_connected,
            ..NetworkState::optimistic(Utc::now())
        }
    }

    #[test]
    fn test_phase_of_state() {
        assert_eq!(LinkPhase::of(&state(true, true)), LinkPhase::Connected);
        assert_eq!(LinkPhase::of(&state(true, false)), LinkPhase::Degraded);
        assert_eq!(LinkPhase::of(&state(false, false)), LinkPhase::Disconnected);
    }

    #[test]
    fn test_came_online_edges() {
        use LinkPhase::*;

        assert!(Disconnected.transition(Connected).came_online());
        assert!(Degraded.transition(Connected).came_online());
        assert!(!Unknown.transition(Connected).came_online());
        assert!(!Connected.transition(Connected).came_online());
        assert!(!Disconnected.transition(Degraded).came_online());
    }

    #[test]
    fn test_went_offline_edges() {
        use LinkPhase::*;

        assert!(Connected.transition(Degraded).went_offline());
        assert!(Connected.transition(Disconnected).went_offline());
        assert!(!Degraded.transition(Disconnected).went_offline());
        assert!(!Degraded.transition(Disconnected).came_online());
        assert!(Degraded.transition(Disconnected).is_change());
    }
}
