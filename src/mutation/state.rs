//! Per-operation state snapshots, listeners, and optimistic-update hooks.

use serde::Serialize;
use std::time::Duration;

use super::error::{ErrorInfo, MutationError};

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    /// Consulting the limiter
    Checking,
    /// A remote call is outstanding
    InFlight,
    /// Waiting before the next retry
    Backoff,
    /// Finished with a result
    Succeeded,
    /// Finished with an error
    Failed,
}

impl MutationPhase {
    /// Whether the operation has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationPhase::Succeeded | MutationPhase::Failed)
    }
}

/// Snapshot of one operation, delivered to listeners after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationAttemptState {
    pub operation_id: String,
    pub phase: MutationPhase,
    /// True from admission until the operation finishes, backoff included
    pub is_in_flight: bool,
    pub last_error: Option<ErrorInfo>,
    /// Retries performed so far, never above `max_retries`
    pub retry_count: u32,
    pub max_retries: u32,
    pub remaining_quota: u64,
    /// Delay being waited out while in `Backoff`
    #[serde(with = "duration_ms")]
    pub next_delay: Option<Duration>,
}

impl MutationAttemptState {
    pub(crate) fn new(operation_id: &str, max_retries: u32, remaining_quota: u64) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            phase: MutationPhase::Checking,
            is_in_flight: false,
            last_error: None,
            retry_count: 0,
            max_retries,
            remaining_quota,
            next_delay: None,
        }
    }

    pub(crate) fn in_flight(&mut self) {
        self.phase = MutationPhase::InFlight;
        self.is_in_flight = true;
        self.next_delay = None;
    }

    pub(crate) fn backoff(&mut self, error: &MutationError, delay: Duration) {
        self.phase = MutationPhase::Backoff;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.next_delay = Some(delay);
    }

    pub(crate) fn succeeded(&mut self, remaining_quota: u64) {
        self.phase = MutationPhase::Succeeded;
        self.is_in_flight = false;
        self.retry_count = 0;
        self.last_error = None;
        self.remaining_quota = remaining_quota;
        self.next_delay = None;
    }

    pub(crate) fn failed(&mut self, error: &MutationError) {
        self.phase = MutationPhase::Failed;
        self.is_in_flight = false;
        self.last_error = Some(error.into());
        self.next_delay = None;
    }

    /// "attempt N of M" style progress for retry indicators; `None` outside backoff.
    pub fn retry_progress(&self) -> Option<(u32, u32)> {
        match self.phase {
            MutationPhase::Backoff => Some((self.retry_count, self.max_retries)),
            _ => None,
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }
}

/// Receives every state transition of every operation.
///
/// Called synchronously from inside `execute`; implementations should not block.
pub trait StateListener: Send + Sync {
    fn on_state_change(&self, state: &MutationAttemptState);
}

impl<F> StateListener for F
where
    F: Fn(&MutationAttemptState) + Send + Sync,
{
    fn on_state_change(&self, state: &MutationAttemptState) {
        self(state)
    }
}

/// Optimistic UI updates around a mutation.
///
/// `apply` runs once the operation is admitted, before the first remote call;
/// `rollback` runs if the operation then fails or is cancelled. Neither runs
/// for an operation rejected before admission.
pub trait OptimisticHooks<T>: Send + Sync {
    fn apply(&self, operation_id: &str, payload: &T);

    fn rollback(&self, operation_id: &str, payload: &T, error: &MutationError);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{ErrorKind, RemoteError};

    #[test]
    fn test_transitions() {
        let mut state = MutationAttemptState::new("lead-1", 3, 10);
        assert_eq!(state.phase, MutationPhase::Checking);
        assert!(!state.is_in_flight);

        state.in_flight();
        assert!(state.is_in_flight);

        let err = MutationError::Retryable(RemoteError::with_status(503, "down"));
        state.backoff(&err, Duration::from_millis(500));
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.retry_progress(), Some((1, 3)));
        assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::Retryable));
        assert!(state.is_in_flight);

        state.in_flight();
        state.succeeded(9);
        assert_eq!(state.phase, MutationPhase::Succeeded);
        assert!(state.phase.is_terminal());
        assert_eq!(state.retry_count, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.remaining_quota, 9);
        assert_eq!(state.retry_progress(), None);
    }

    #[test]
    fn test_state_serializes_delay_in_ms() {
        let mut state = MutationAttemptState::new("lead-1", 3, 10);
        state.in_flight();
        state.backoff(
            &MutationError::Retryable(RemoteError::timeout()),
            Duration::from_millis(1000),
        );

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "backoff");
        assert_eq!(json["next_delay"], 1000);
        assert_eq!(json["last_error"]["kind"], "retryable");
    }

    #[test]
    fn test_closure_listener() {
        let seen = std::sync::Mutex::new(Vec::new());
        let listener = |state: &MutationAttemptState| seen.lock().unwrap().push(state.phase);

        listener.on_state_change(&MutationAttemptState::new("x", 0, 0));
        assert_eq!(*seen.lock().unwrap(), vec![MutationPhase::Checking]);
    }
}
