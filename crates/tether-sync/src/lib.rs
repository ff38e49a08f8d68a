//! # tether-sync: Connectivity Runtime for Tether
//!
//! Decides whether the device can really reach the network, tells the rest
//! of the app, and replays writes deferred while it could not.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Connectivity Architecture                          │
//! │                                                                         │
//! │  ┌──────────────┐ raw events  ┌──────────────────────────────────────┐ │
//! │  │ LinkMonitor  │────────────►│        NetworkStateStore             │ │
//! │  │ (platform)   │             │                                      │ │
//! │  └──────────────┘             │ debounce → classify → commit         │ │
//! │                               │ persist (async) + notify (sync)      │ │
//! │  ┌──────────────┐  outcomes   │                                      │ │
//! │  │ Reachability │────────────►│ single writer of NetworkState        │ │
//! │  │ Prober       │◄────────────│ triggers probes on ambiguity         │ │
//! │  └──────────────┘  trigger    └───────────┬──────────────┬───────────┘ │
//! │         ▲                                 │ watch        │ get_state   │
//! │         │ failure counter                 ▼              ▼             │
//! │  ┌──────┴───────┐             ┌──────────────┐   ┌─────────────────┐  │
//! │  │ TimeoutGuard │◄────────────│ SyncScheduler│   │ UI / listeners  │  │
//! │  │ fail-fast,   │  each replay│ interval,    │   └─────────────────┘  │
//! │  │ deadlines    │             │ reconnect,   │                        │
//! │  └──────────────┘             │ enqueue kick │                        │
//! │                               └──────┬───────┘                        │
//! │                                      ▼                                 │
//! │                               ┌──────────────┐      ┌──────────────┐  │
//! │                               │ PendingQueue │─────►│ Executor     │  │
//! │                               │ (persisted)  │      │ (injected)   │  │
//! │                               └──────────────┘      └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - `Connectivity` facade and builder
//! - [`store`] - `NetworkStateStore`, owner of the classified state
//! - [`prober`] - HTTP liveness probes with fallback race
//! - [`guard`] - `TimeoutGuard` for outbound calls
//! - [`queue`] - Durable write-behind queue
//! - [`scheduler`] - Sync passes and their triggers
//! - [`link`] - Platform link-monitor seam
//! - [`listeners`] - Ordered state listeners
//! - [`storage`] - SQLite and in-memory persistence
//! - [`config`] - TOML configuration with env overrides
//! - [`clock`] - Wall-clock seam
//! - [`error`] - Error types
//! - [`testing`] - Test doubles
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_sync::{executor_fn, ConnectivityBuilder, ConnectivityConfig};
//!
//! let connectivity = ConnectivityBuilder::new(ConnectivityConfig::load_or_default(None))
//!     .with_database(database)
//!     .with_link_monitor(platform_monitor)
//!     .with_executor(executor_fn(|op| async move { api.apply(op).await }))
//!     .build()?;
//!
//! connectivity.initialize().await;
//!
//! let _sub = connectivity.subscribe(|state| {
//!     println!("online: {}", state.effectively_connected);
//! });
//!
//! let profile = connectivity
//!     .guard()
//!     .run(|| api.fetch_profile(), Duration::from_secs(10), Some(cached))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod link;
pub mod listeners;
pub mod prober;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ConnectivityConfig;
pub use error::{SyncError, SyncResult};
pub use guard::{GuardError, TimeoutGuard};
pub use link::{LinkMonitor, ManualLinkMonitor};
pub use listeners::Subscription;
pub use prober::{HttpProbe, ProbeOutcome, ProbeTransport, ReachabilityProber};
pub use queue::PendingQueue;
pub use scheduler::{
    executor_fn, ExecutorError, OperationExecutor, SyncReport, SyncScheduler, SyncStatus,
};
pub use service::{Connectivity, ConnectivityBuilder};
pub use storage::{MemoryStorage, SqliteStorage, StateStorage};
pub use store::NetworkStateStore;
