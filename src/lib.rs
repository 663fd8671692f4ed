//! Gatekeep - Client-Side Throttled Mutations
//!
//! This crate gates sensitive remote operations (logins, lead enrichment)
//! behind a per-key sliding-window limiter, retries transient failures with
//! exponential backoff, and tracks a remaining quota that UI code can render.

pub mod clock;
pub mod config;
pub mod error;
pub mod mutation;
pub mod ratelimit;
pub mod telemetry;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{GatekeepConfig, LimiterConfig, PolicyConfig, RetryConfig};
pub use error::{GatekeepError, Result};
pub use mutation::{MutationError, ThrottledMutation};
pub use ratelimit::{AttemptStore, Decision, SlidingWindowLimiter};
