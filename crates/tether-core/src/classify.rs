//! # Connectivity Classifier
//!
//! Pure function that fuses a raw link event with the prober's failure count
//! into a single `effectively_connected` verdict.
//!
//! ## Decision Rules (priority order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Classification Rules                                 │
//! │                                                                         │
//! │  1. is_connected == false         → effectively_connected = false      │
//! │  2. reachability == Unreachable   → effectively_connected = false      │
//! │  3. reachability == Reachable     → effectively_connected = true       │
//! │  4. reachability == Unknown       → request an immediate probe, and    │
//! │                                     decide from the failure counter:   │
//! │                                                                         │
//! │        failures < threshold(connection_type)  → true                   │
//! │        failures ≥ threshold(connection_type)  → false                  │
//! │                                                                         │
//! │  THRESHOLDS:                                                           │
//! │  • cellular: 1  (a radio can say "connected" while carrying no data)   │
//! │  • others:   2  (wifi flaps are common and usually self-correct)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The only "side effect" is the [`ProbeReason`] in the result; the caller
//! decides how to act on it.

use chrono::{DateTime, Utc};

use crate::types::{ConnectionType, NetworkState, RawLinkState, Reachability};

/// Consecutive probe failures that demote a cellular link.
pub const CELLULAR_FAILURE_THRESHOLD: u32 = 1;

/// Consecutive probe failures that demote any other link.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Returns the consecutive-failure count at which `connection_type` is
/// considered disconnected.
#[inline]
pub fn failure_threshold(connection_type: ConnectionType) -> u32 {
    if connection_type.is_cellular() {
        CELLULAR_FAILURE_THRESHOLD
    } else {
        DEFAULT_FAILURE_THRESHOLD
    }
}

/// Returns true if `failures` has reached the demotion threshold.
#[inline]
pub fn exceeds_threshold(connection_type: ConnectionType, failures: u32) -> bool {
    failures >= failure_threshold(connection_type)
}

/// Why the classifier wants a probe right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReason {
    /// The platform could not say whether the internet is reachable.
    AmbiguousReachability,

    /// Same, on an LTE/5G link where the OS signal is least reliable.
    AmbiguousHighBandwidthCellular,
}

/// Output of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The new state.
    pub state: NetworkState,

    /// Set when rule 4 fired.
    pub probe: Option<ProbeReason>,
}

/// Classifies a raw link event.
///
/// ## Example
/// ```rust
/// use chrono::Utc;
/// use tether_core::classify::classify;
/// use tether_core::{RawLinkState, Reachability};
///
/// let raw = RawLinkState::wifi(Reachability::Reachable);
/// let result = classify(&raw, 0, Utc::now());
/// assert!(result.state.effectively_connected);
/// assert!(result.probe.is_none());
/// ```
pub fn classify(raw: &RawLinkState, failures: u32, now: DateTime<Utc>) -> Classification {
    let (effectively_connected, probe) = if !raw.is_connected {
        (false, None)
    } else {
        match raw.is_internet_reachable {
            Reachability::Unreachable => (false, None),
            Reachability::Reachable => (true, None),
            Reachability::Unknown => {
                let reason = match raw.cellular_generation {
                    Some(generation)
                        if raw.connection_type.is_cellular() && generation.is_high_bandwidth() =>
                    {
                        ProbeReason::AmbiguousHighBandwidthCellular
                    }
                    _ => ProbeReason::AmbiguousReachability,
                };
                let verdict = !exceeds_threshold(raw.connection_type, failures);
                (verdict, Some(reason))
            }
        }
    };

    Classification {
        state: NetworkState {
            is_connected: raw.is_connected,
            connection_type: raw.connection_type,
            is_internet_reachable: raw.is_internet_reachable,
            effectively_connected,
            last_checked: now,
        },
        probe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellularGeneration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_link_down_is_always_disconnected() {
        let mut raw = RawLinkState::disconnected();
        // Even a contradictory "reachable" flag cannot win over rule 1
        raw.is_internet_reachable = Reachability::Reachable;

        let result = classify(&raw, 0, now());
        assert!(!result.state.effectively_connected);
        assert!(result.probe.is_none());
    }

    #[test]
    fn test_explicit_reachability_wins() {
        let result = classify(&RawLinkState::wifi(Reachability::Unreachable), 0, now());
        assert!(!result.state.effectively_connected);

        // Reachable beats any number of earlier probe failures
        let result = classify(&RawLinkState::wifi(Reachability::Reachable), 10, now());
        assert!(result.state.effectively_connected);
        assert!(result.probe.is_none());
    }

    #[test]
    fn test_unknown_on_wifi_tolerates_one_failure() {
        let raw = RawLinkState::wifi(Reachability::Unknown);

        assert!(classify(&raw, 0, now()).state.effectively_connected);
        assert!(classify(&raw, 1, now()).state.effectively_connected);
        assert!(!classify(&raw, 2, now()).state.effectively_connected);
    }

    #[test]
    fn test_unknown_on_cellular_demotes_after_one_failure() {
        let raw = RawLinkState::cellular(Reachability::Unknown, Some(CellularGeneration::G3));

        assert!(classify(&raw, 0, now()).state.effectively_connected);
        assert!(!classify(&raw, 1, now()).state.effectively_connected);
    }

    #[test]
    fn test_unknown_requests_probe() {
        let result = classify(&RawLinkState::wifi(Reachability::Unknown), 0, now());
        assert_eq!(result.probe, Some(ProbeReason::AmbiguousReachability));

        let lte = RawLinkState::cellular(Reachability::Unknown, Some(CellularGeneration::G4));
        assert_eq!(
            classify(&lte, 0, now()).probe,
            Some(ProbeReason::AmbiguousHighBandwidthCellular)
        );
    }

    #[test]
    fn test_invariant_holds_for_all_inputs() {
        let types = [
            ConnectionType::Wifi,
            ConnectionType::Cellular,
            ConnectionType::None,
            ConnectionType::Unknown,
        ];
        let reach = [
            Reachability::Reachable,
            Reachability::Unreachable,
            Reachability::Unknown,
        ];

        for connection_type in types {
            for is_internet_reachable in reach {
                for is_connected in [true, false] {
                    for failures in 0..4 {
                        let raw = RawLinkState {
                            is_connected,
                            connection_type,
                            is_internet_reachable,
                            cellular_generation: None,
                        };
                        let state = classify(&raw, failures, now()).state;
                        assert!(state.is_consistent(), "{:?} / {}", raw, failures);
                    }
                }
            }
        }
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(failure_threshold(ConnectionType::Cellular), 1);
        assert_eq!(failure_threshold(ConnectionType::Wifi), 2);
        assert_eq!(failure_threshold(ConnectionType::Unknown), 2);
    }
}
