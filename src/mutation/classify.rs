//! Retryable vs terminal classification of remote failures.

use std::collections::HashSet;

use crate::config::RetryConfig;

use super::error::{MutationError, RemoteError};

/// Message fragments that mark a status-less failure as transient.
const TRANSIENT_HINTS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "temporarily unavailable",
    "too many requests",
    "rate limit",
];

/// Decides whether a remote failure is worth retrying.
pub trait ErrorClassifier: Send + Sync {
    /// Map a remote failure to [`MutationError::Retryable`] or [`MutationError::Terminal`].
    fn classify(&self, error: RemoteError) -> MutationError;
}

/// Classifier driven by a set of transient status codes.
///
/// Failures without a status are transient when their message looks like a
/// timeout or connectivity problem.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    retryable: HashSet<u16>,
}

impl StatusClassifier {
    /// Treat exactly `statuses` as transient.
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            retryable: statuses.into_iter().collect(),
        }
    }

    /// Build from a retry configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.retryable_statuses.iter().copied())
    }

    fn is_transient(&self, error: &RemoteError) -> bool {
        match error.status {
            Some(status) => self.retryable.contains(&status),
            None => {
                let message = error.message.to_lowercase();
                TRANSIENT_HINTS.iter().any(|hint| message.contains(hint))
            }
        }
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl ErrorClassifier for StatusClassifier {
    fn classify(&self, error: RemoteError) -> MutationError {
        if self.is_transient(&error) {
            MutationError::Retryable(error)
        } else {
            MutationError::Terminal(error)
        }
    }
}
