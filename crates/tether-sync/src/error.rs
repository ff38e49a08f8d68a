//! # Sync Error Types
//!
//! Error types for the connectivity runtime.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connectivity Error Categories                        │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │  Configuration  │  │  HTTP client    │  │     Queue               │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  InvalidConfig  │  │  Http           │  │  Validation             │  │
//! │  │  InvalidUrl     │  │                 │  │  (bad entity name)      │  │
//! │  │  ConfigLoad/Save│  │                 │  │  InvalidRecord          │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Persistence                                                    │    │
//! │  │                                                                 │    │
//! │  │  Persistence    (record unreadable or unwritable right now)     │    │
//! │  │  Serialization  (record exists but no longer decodes)           │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! Only `Validation` and configuration errors reach callers. The guard's
//! fail-fast error is `guard::GuardError::NetworkUnavailable`, probe
//! failures never become a `SyncError` at all (see `prober::ProbeError`),
//! and persistence failures are logged by the store and the queue, then
//! swallowed.

use thiserror::Error;

/// Result type alias for connectivity operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type covering every failure the connectivity runtime can report.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid probe endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // HTTP Errors
    // =========================================================================
    /// HTTP client could not be created.
    #[error("HTTP client error: {0}")]
    Http(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Rejected input (e.g. an invalid entity name).
    #[error("Validation failed: {0}")]
    Validation(#[from] tether_core::ValidationError),

    /// A persisted record violates a model invariant.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Writing or reading durable state failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tether_db::DbError> for SyncError {
    fn from(err: tether_db::DbError) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<tether_core::CoreError> for SyncError {
    fn from(err: tether_core::CoreError) -> Self {
        match err {
            tether_core::CoreError::Validation(v) => SyncError::Validation(v),
            other => SyncError::InvalidRecord(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Http(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_category() {
        assert!(SyncError::InvalidUrl("nope".into()).is_config_error());
        assert!(SyncError::ConfigLoadFailed("missing".into()).is_config_error());
        assert!(!SyncError::Persistence("database is locked".into()).is_config_error());
    }

    #[test]
    fn test_db_errors_become_persistence_errors() {
        let err: SyncError = tether_db::DbError::QueryFailed("database is locked".into()).into();
        assert!(matches!(err, SyncError::Persistence(_)));
    }

    #[test]
    fn test_validation_passes_through_core_error() {
        let core = tether_core::CoreError::Validation(tether_core::ValidationError::Required {
            field: "entity".into(),
        });
        let err: SyncError = core.into();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(err.to_string(), "Validation failed: entity is required");
    }
}
