//! Error types for the conductor core.
//!
//! Resource conflicts and missing callback registry entries are deliberately
//! absent here: the first is expressed as a [`ConflictCheck`] resolution value,
//! the second as a zero restore count.
//!
//! [`ConflictCheck`]: crate::orchestration::resource_ledger::ConflictCheck

use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConductorError {
    /// Caller broke the contract of an operation (e.g. enqueueing a request
    /// without an id). Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Unauthorized subscription attempt while the gate runs in strict mode
    #[error("Policy violation by {actor_id}: {message}")]
    PolicyViolation { actor_id: String, message: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A subscriber failed while the transport was dispatching an event
    #[error("Transport error for event {event_name}: {reason}")]
    Transport { event_name: String, reason: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ConductorError {
    fn from(error: serde_json::Error) -> Self {
        ConductorError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<ConfigurationError> for ConductorError {
    fn from(error: ConfigurationError) -> Self {
        ConductorError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_display() {
        let err = ConductorError::PolicyViolation {
            actor_id: "plugin:canvas".to_string(),
            message: "subscribe outside mount phase".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Policy violation by plugin:canvas: subscribe outside mount phase"
        );
    }

    #[test]
    fn test_json_error_converts_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ConductorError = json_err.into();
        assert!(matches!(err, ConductorError::Serialization(_)));
    }
}
