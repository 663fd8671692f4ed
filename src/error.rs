//! Error types for Gatekeep configuration and setup.
//!
//! Failures of a throttled mutation itself are reported through
//! [`crate::mutation::MutationError`], never through this type.

use thiserror::Error;

/// Main error type for Gatekeep setup operations.
#[derive(Error, Debug)]
pub enum GatekeepError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging/tracing initialization errors
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatekeepError {
    fn from(err: config::ConfigError) -> Self {
        GatekeepError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatekeepError {
    fn from(err: serde_yaml::Error) -> Self {
        GatekeepError::Config(err.to_string())
    }
}

/// Result type alias for Gatekeep setup operations.
pub type Result<T> = std::result::Result<T, GatekeepError>;
