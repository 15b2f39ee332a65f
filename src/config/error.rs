//! Configuration Error Types
//!
//! Error handling for configuration loading and validation.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Layered sources could not be read or merged
    #[error("Failed to load configuration from '{source_path}': {error}")]
    LoadError { source_path: String, error: String },

    /// Merged configuration could not be deserialized into the typed structure
    #[error("Failed to deserialize configuration: {error}")]
    DeserializationError { error: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn load_error(source_path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::LoadError {
            source_path: source_path.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::DeserializationError {
            error: error.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
