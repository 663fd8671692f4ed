//! Failure taxonomy for throttled mutations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure reported by the remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// HTTP-like status code, if the transport produced one
    pub status: Option<u16>,
    /// Human-readable description
    pub message: String,
}

impl RemoteError {
    /// An error without a status code (network failure, timeout, ...).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// An error carrying a status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// A transport timeout.
    pub fn timeout() -> Self {
        Self::new("request timed out")
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Why a mutation did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Malformed operation id or payload. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Denied before the remote call; the caller may try again after the delay.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Transient failure, eligible for automatic retry.
    #[error("Retryable failure: {0}")]
    Retryable(RemoteError),

    /// Non-transient failure. Never retried.
    #[error("Terminal failure: {0}")]
    Terminal(RemoteError),

    /// A transient failure that outlasted the retry budget.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteError },

    /// Another `execute` for the same operation id is still running.
    #[error("Operation '{0}' is already in flight")]
    AlreadyInFlight(String),

    /// The operation was cancelled before it could finish.
    #[error("Operation '{0}' was cancelled")]
    Cancelled(String),
}

/// Discriminant of [`MutationError`], for state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    RateLimited,
    Retryable,
    Terminal,
    RetriesExhausted,
    AlreadyInFlight,
    Cancelled,
}

impl MutationError {
    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MutationError::InvalidInput(_) => ErrorKind::InvalidInput,
            MutationError::RateLimited { .. } => ErrorKind::RateLimited,
            MutationError::Retryable(_) => ErrorKind::Retryable,
            MutationError::Terminal(_) => ErrorKind::Terminal,
            MutationError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            MutationError::AlreadyInFlight(_) => ErrorKind::AlreadyInFlight,
            MutationError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            MutationError::Retryable(e) | MutationError::Terminal(e) => Some(e),
            MutationError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Milliseconds until a rate-limited caller may try again.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            MutationError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Serializable summary of the last error seen by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&MutationError> for ErrorInfo {
    fn from(err: &MutationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        assert_eq!(
            RemoteError::with_status(401, "unauthorized").to_string(),
            "status 401: unauthorized"
        );
        assert_eq!(RemoteError::timeout().to_string(), "request timed out");
    }

    #[test]
    fn test_error_kind_and_info() {
        let err = MutationError::RetriesExhausted {
            attempts: 4,
            last: RemoteError::with_status(503, "unavailable"),
        };
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(err.remote().and_then(|e| e.status), Some(503));

        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::RetriesExhausted);
        assert!(info.message.contains("4 attempts"));
    }

    #[test]
    fn test_rate_limited_retry_after() {
        let err = MutationError::RateLimited { retry_after_ms: 1200 };
        assert_eq!(err.retry_after_ms(), Some(1200));
        assert_eq!(MutationError::InvalidInput("x".into()).retry_after_ms(), None);
    }

    #[test]
    fn test_error_info_serializes_snake_case() {
        let info = ErrorInfo {
            kind: ErrorKind::RateLimited,
            message: "slow down".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"kind":"rate_limited","message":"slow down"}"#);
    }
}
