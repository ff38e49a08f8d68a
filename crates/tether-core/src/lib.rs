//! # tether-core: Pure Connectivity Model
//!
//! This crate holds the data model and the decision logic of the
//! connectivity subsystem as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              App (note screens, chat screens, banners)          │   │
//! │  │    enqueue writes ─► guard outbound calls ─► subscribe          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │       tether-sync (prober, store, guard, queue, scheduler)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tether-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ classify  │  │   phase   │  │ validation│  │   │
//! │  │   │NetworkSt. │  │ rules 1-4 │  │ LinkPhase │  │  entity   │  │   │
//! │  │   │PendingOp  │  │ threshold │  │ edges     │  │  names    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - `NetworkState`, `RawLinkState`, `PendingOperation`, ...
//! - [`classify`] - The connectivity classifier
//! - [`phase`] - `Unknown → Connected → Degraded → Disconnected`
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use tether_core::classify::classify;
//! use tether_core::{CellularGeneration, RawLinkState, Reachability};
//!
//! // Fresh LTE link, OS can't tell whether the internet is reachable
//! let raw = RawLinkState::cellular(Reachability::Unknown, Some(CellularGeneration::G4));
//!
//! // One failed probe is enough to demote cellular
//! let result = classify(&raw, 1, Utc::now());
//! assert!(!result.state.effectively_connected);
//! assert!(result.probe.is_some());
//! ```

pub mod classify;
pub mod error;
pub mod phase;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use classify::{classify, failure_threshold, Classification, ProbeReason};
pub use error::{CoreError, CoreResult, ValidationError};
pub use phase::{LinkPhase, PhaseTransition};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Failed replay attempts after which a queued write is dropped.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Age after which a persisted `NetworkState` is discarded at startup.
pub const STATE_FRESHNESS_SECS: i64 = 120;
