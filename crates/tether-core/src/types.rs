//! # Domain Types
//!
//! Core domain types shared by every Tether component.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐          ┌─────────────────────────┐          │
//! │  │   RawLinkState      │ classify │     NetworkState        │          │
//! │  │  ─────────────────  │ ───────► │  ─────────────────────  │          │
//! │  │  is_connected       │          │  is_connected           │          │
//! │  │  connection_type    │          │  connection_type        │          │
//! │  │  reachability       │          │  is_internet_reachable  │          │
//! │  │  cellular_generation│          │  effectively_connected  │          │
//! │  └─────────────────────┘          │  last_checked           │          │
//! │   (one platform event)            └─────────────────────────┘          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    PendingOperation                             │   │
//! │  │  id │ type │ entity │ payload │ enqueued_at │ retry_count        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Shapes
//! Both persisted records are camelCase JSON so that a state written by one
//! build can be read back by the next:
//! - `NetworkState` → `{"isConnected":true,"connectionType":"wifi",...}`
//! - `PendingOperation` → `{"id":"...","type":"create","entity":"note",...}`

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Connection Type
// =============================================================================

/// Transport reported by the platform for the active link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    None,
    #[default]
    Unknown,
}

impl ConnectionType {
    /// Returns true for metered, variable-latency links.
    #[inline]
    pub fn is_cellular(&self) -> bool {
        matches!(self, ConnectionType::Cellular)
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Wifi => write!(f, "wifi"),
            ConnectionType::Cellular => write!(f, "cellular"),
            ConnectionType::None => write!(f, "none"),
            ConnectionType::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Cellular Generation
// =============================================================================

/// Radio generation of a cellular link, when the platform reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellularGeneration {
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "5g")]
    G5,
}

impl CellularGeneration {
    /// LTE and 5G. On these the OS reachability flag is least trustworthy.
    #[inline]
    pub fn is_high_bandwidth(&self) -> bool {
        matches!(self, CellularGeneration::G4 | CellularGeneration::G5)
    }
}

// =============================================================================
// Reachability (tri-state)
// =============================================================================

/// Platform-reported internet reachability.
///
/// Serialized as `true`, `false` or `null`, which is how platform link
/// APIs report it and how the persisted state record stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Reachability {
    Reachable,
    Unreachable,
    #[default]
    Unknown,
}

impl From<Option<bool>> for Reachability {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Reachability::Reachable,
            Some(false) => Reachability::Unreachable,
            None => Reachability::Unknown,
        }
    }
}

impl From<Reachability> for Option<bool> {
    fn from(value: Reachability) -> Self {
        match value {
            Reachability::Reachable => Some(true),
            Reachability::Unreachable => Some(false),
            Reachability::Unknown => None,
        }
    }
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reachability::Reachable => write!(f, "reachable"),
            Reachability::Unreachable => write!(f, "unreachable"),
            Reachability::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Raw Link State
// =============================================================================

/// One snapshot of what the platform says about the link.
///
/// This is the input to classification; it is never shown to consumers
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLinkState {
    /// Link presence (an interface is up).
    pub is_connected: bool,

    /// Active transport.
    pub connection_type: ConnectionType,

    /// What the platform thinks about internet reachability.
    pub is_internet_reachable: Reachability,

    /// Radio generation, cellular links only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cellular_generation: Option<CellularGeneration>,
}

impl RawLinkState {
    /// A link that is down.
    pub fn disconnected() -> Self {
        RawLinkState {
            is_connected: false,
            connection_type: ConnectionType::None,
            is_internet_reachable: Reachability::Unreachable,
            cellular_generation: None,
        }
    }

    /// A wifi link with the given reachability.
    pub fn wifi(reachability: Reachability) -> Self {
        RawLinkState {
            is_connected: true,
            connection_type: ConnectionType::Wifi,
            is_internet_reachable: reachability,
            cellular_generation: None,
        }
    }

    /// A cellular link with the given reachability and generation.
    pub fn cellular(reachability: Reachability, generation: Option<CellularGeneration>) -> Self {
        RawLinkState {
            is_connected: true,
            connection_type: ConnectionType::Cellular,
            is_internet_reachable: reachability,
            cellular_generation: generation,
        }
    }
}

// =============================================================================
// Network State
// =============================================================================

/// The classified connectivity verdict consumed by the rest of the app.
///
/// ## Invariant
/// `effectively_connected == true` implies `is_connected == true`.
/// The reverse does not hold: a link can be up while probes fail
/// (the "degraded" case).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    /// Raw platform-reported link presence.
    pub is_connected: bool,

    /// Active transport.
    pub connection_type: ConnectionType,

    /// Platform-reported reachability (may be ambiguous on cellular).
    #[ts(type = "boolean | null")]
    pub is_internet_reachable: Reachability,

    /// Fused verdict: the device has *usable* internet access.
    pub effectively_connected: bool,

    /// When this state was computed.
    #[ts(as = "String")]
    pub last_checked: DateTime<Utc>,
}

impl NetworkState {
    /// Process-start defaults: assume we are online until told otherwise.
    pub fn optimistic(now: DateTime<Utc>) -> Self {
        NetworkState {
            is_connected: true,
            connection_type: ConnectionType::Unknown,
            is_internet_reachable: Reachability::Unknown,
            effectively_connected: true,
            last_checked: now,
        }
    }

    /// Returns true if this state was computed within `window` of `now`.
    ///
    /// States stamped in the future (clock skew) are treated as stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let age = now.signed_duration_since(self.last_checked);
        age >= Duration::zero() && age <= window
    }

    /// Checks the `effectively_connected ⇒ is_connected` invariant.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        !self.effectively_connected || self.is_connected
    }

    /// Returns true if the fields a listener cares about differ.
    ///
    /// `last_checked` is ignored: re-stamping an identical verdict is not a
    /// change.
    pub fn differs_from(&self, other: &NetworkState) -> bool {
        self.is_connected != other.is_connected
            || self.connection_type != other.connection_type
            || self.is_internet_reachable != other.is_internet_reachable
            || self.effectively_connected != other.effectively_connected
    }
}

// =============================================================================
// Pending Operation
// =============================================================================

/// Kind of deferred write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(crate::error::ValidationError::NotAllowed {
                field: "type".to_string(),
                allowed: vec!["create".into(), "update".into(), "delete".into()],
            }),
        }
    }
}

/// A write that could not be applied immediately.
///
/// Entries are created by the queue, mutated only by the sync pass
/// (`retry_count`), and removed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Opaque unique identifier (UUID v4).
    pub id: String,

    /// Kind of write.
    #[serde(rename = "type")]
    pub op_type: OperationType,

    /// Logical resource name, e.g. "note".
    pub entity: String,

    /// Opaque body handed to the executor untouched.
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,

    /// When the write was deferred. Replay order key.
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,

    /// Failed replay attempts so far.
    pub retry_count: u32,
}

impl PendingOperation {
    /// Creates a fresh entry with a generated id and `retry_count = 0`.
    pub fn new(
        op_type: OperationType,
        entity: impl Into<String>,
        payload: serde_json::Value,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        PendingOperation {
            id: Uuid::new_v4().to_string(),
            op_type,
            entity: entity.into(),
            payload,
            enqueued_at,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_reachability_serializes_as_nullable_bool() {
        assert_eq!(serde_json::to_string(&Reachability::Reachable).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Reachability::Unreachable).unwrap(), "false");
        assert_eq!(serde_json::to_string(&Reachability::Unknown).unwrap(), "null");

        let parsed: Reachability = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Reachability::Unknown);
    }

    #[test]
    fn test_network_state_json_shape() {
        let state = NetworkState {
            is_connected: true,
            connection_type: ConnectionType::Cellular,
            is_internet_reachable: Reachability::Unknown,
            effectively_connected: false,
            last_checked: at(0),
        };

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isConnected"], true);
        assert_eq!(json["connectionType"], "cellular");
        assert!(json["isInternetReachable"].is_null());
        assert_eq!(json["effectivelyConnected"], false);
        assert!(json["lastChecked"].is_string());
    }

    #[test]
    fn test_freshness_window() {
        let state = NetworkState::optimistic(at(0));
        let window = Duration::minutes(2);

        assert!(state.is_fresh(at(60), window));
        assert!(state.is_fresh(at(120), window));
        assert!(!state.is_fresh(at(121), window));
        // Stamped in the future: don't trust it
        assert!(!state.is_fresh(at(-10), window));
    }

    #[test]
    fn test_optimistic_defaults_are_consistent() {
        let state = NetworkState::optimistic(at(0));
        assert!(state.effectively_connected);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_differs_ignores_timestamp() {
        let a = NetworkState::optimistic(at(0));
        let mut b = a.clone();
        b.last_checked = at(30);
        assert!(!a.differs_from(&b));

        b.effectively_connected = false;
        assert!(a.differs_from(&b));
    }

    #[test]
    fn test_pending_operation_json_shape() {
        let op = PendingOperation::new(
            OperationType::Create,
            "note",
            serde_json::json!({"title": "hello"}),
            at(0),
        );

        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "create");
        assert_eq!(json["entity"], "note");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["payload"]["title"], "hello");
        assert!(json["enqueuedAt"].is_string());

        let back: PendingOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_operation_type_parsing() {
        assert_eq!("CREATE".parse::<OperationType>().unwrap(), OperationType::Create);
        assert_eq!("delete".parse::<OperationType>().unwrap(), OperationType::Delete);
        assert!("upsert".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_high_bandwidth_generations() {
        assert!(CellularGeneration::G4.is_high_bandwidth());
        assert!(CellularGeneration::G5.is_high_bandwidth());
        assert!(!CellularGeneration::G3.is_high_bandwidth());
    }
}
