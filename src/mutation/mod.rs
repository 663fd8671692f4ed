//! Remote mutations with admission control, retry/backoff and quota tracking.

mod backoff;
mod classify;
mod error;
mod executor;
pub mod flows;
mod remote;
mod state;
mod stats;

pub use backoff::BackoffPolicy;
pub use classify::{ErrorClassifier, StatusClassifier};
pub use error::{ErrorInfo, ErrorKind, MutationError, RemoteError};
pub use executor::{KeyFn, ThrottledMutation, ThrottledMutationBuilder, Validator};
pub use remote::{remote_fn, FnRemote, RemoteCall};
pub use state::{MutationAttemptState, MutationPhase, OptimisticHooks, StateListener};
pub use stats::{MutationStats, Quota, StatsSnapshot, StatusReport};
