//! # Validation Module
//!
//! Input validation for records entering the write-behind queue and for
//! records read back from storage.
//!
//! ## Usage
//! ```rust
//! use tether_core::validation::validate_entity;
//!
//! validate_entity("note").unwrap();
//! assert!(validate_entity("").is_err());
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::NetworkState;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted logical resource name.
pub const MAX_ENTITY_LEN: usize = 64;

/// Validates a logical resource name.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, numbers, `_`, `-` and `.` only (e.g. `note`, `chat.message`)
///
/// ## Example
/// ```rust
/// use tether_core::validation::validate_entity;
///
/// assert!(validate_entity("chat.message").is_ok());
/// assert!(validate_entity("notes/1").is_err());
/// assert!(validate_entity("n".repeat(65).as_str()).is_err());
/// ```
pub fn validate_entity(entity: &str) -> ValidationResult<()> {
    let entity = entity.trim();

    if entity.is_empty() {
        return Err(ValidationError::Required {
            field: "entity".to_string(),
        });
    }

    if entity.len() > MAX_ENTITY_LEN {
        return Err(ValidationError::TooLong {
            field: "entity".to_string(),
            max: MAX_ENTITY_LEN,
        });
    }

    if !entity
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "entity".to_string(),
            reason: "must contain only letters, numbers, '_', '-' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Checks a `NetworkState` read back from storage.
pub fn validate_network_state(state: &NetworkState) -> CoreResult<()> {
    if !state.is_consistent() {
        return Err(CoreError::InconsistentRecord {
            record: "network state".to_string(),
            reason: "effectively connected while link is down".to_string(),
        });
    }
    Ok(())
}
