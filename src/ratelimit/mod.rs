//! Per-key sliding-window admission control.

mod key;
mod limiter;
mod store;

pub use key::AttemptKey;
pub use limiter::{Decision, SlidingWindowLimiter};
pub use store::{AttemptRecord, AttemptStore};
