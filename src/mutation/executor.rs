//! Throttled mutation execution: admission, retry with backoff, quota.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::PolicyConfig;
use crate::ratelimit::{AttemptKey, AttemptStore, Decision, SlidingWindowLimiter};

use super::backoff::BackoffPolicy;
use super::classify::{ErrorClassifier, StatusClassifier};
use super::error::MutationError;
use super::remote::RemoteCall;
use super::state::{MutationAttemptState, OptimisticHooks, StateListener};
use super::stats::{MutationStats, Quota, StatsSnapshot, StatusReport};

/// Capacity of the state broadcast channel; slow subscribers skip old states.
const STATE_CHANNEL_CAPACITY: usize = 256;

/// Derives the limiter key from an operation id and its payload.
///
/// Returning `None` (or a blank key) rejects the call as invalid input.
pub type KeyFn<T> = Arc<dyn Fn(&str, &T) -> Option<String> + Send + Sync>;

/// Checks a payload before anything else happens; `Err` carries the reason.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Handle kept for every running operation.
struct OperationHandle {
    cancel: watch::Sender<bool>,
}

/// Removes an operation from the registry when `execute` finishes or is dropped.
struct Registration<'a> {
    operations: &'a DashMap<String, OperationHandle>,
    operation_id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.operations.remove(&self.operation_id);
    }
}

/// Runs remote operations behind a sliding-window limiter with bounded,
/// exponentially backed-off retries.
///
/// One instance serves one kind of operation (e.g. "enrich lead"); each
/// `execute` call is an independent operation instance identified by its
/// operation id.
pub struct ThrottledMutation<T, R> {
    name: String,
    policy: PolicyConfig,
    limiter: Arc<SlidingWindowLimiter>,
    remote: Arc<dyn RemoteCall<T, R>>,
    classifier: Arc<dyn ErrorClassifier>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    key_fn: KeyFn<T>,
    validator: Option<Validator<T>>,
    listeners: Vec<Arc<dyn StateListener>>,
    hooks: Option<Arc<dyn OptimisticHooks<T>>>,
    states: broadcast::Sender<MutationAttemptState>,
    quota: Quota,
    stats: MutationStats,
    operations: DashMap<String, OperationHandle>,
}

impl<T, R> ThrottledMutation<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Start building a mutation named `name` around `remote`.
    pub fn builder(
        name: impl Into<String>,
        remote: Arc<dyn RemoteCall<T, R>>,
    ) -> ThrottledMutationBuilder<T, R> {
        ThrottledMutationBuilder::new(name, remote)
    }

    /// Run one operation to completion.
    ///
    /// Retries happen inside this call; the caller only sees the final
    /// outcome, plus state notifications if subscribed.
    #[instrument(skip(self, payload), fields(mutation = %self.name))]
    pub async fn execute(&self, operation_id: &str, payload: T) -> Result<R, MutationError> {
        let operation_id = operation_id.trim();
        if operation_id.is_empty() {
            debug!("Rejected operation with empty id");
            return Err(MutationError::InvalidInput("operation id is required".to_string()));
        }

        if let Some(validator) = &self.validator {
            validator(&payload).map_err(|reason| {
                debug!(operation_id, reason = %reason, "Rejected invalid payload");
                MutationError::InvalidInput(reason)
            })?;
        }

        let key = (self.key_fn)(operation_id, &payload)
            .and_then(|raw| AttemptKey::parse(&raw))
            .ok_or_else(|| {
                debug!(operation_id, "Rejected operation without a rate-limit key");
                MutationError::InvalidInput("payload has no rate-limit key".to_string())
            })?;

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let _registration = match self.operations.entry(operation_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(operation_id, "Operation already in flight");
                return Err(MutationError::AlreadyInFlight(operation_id.to_string()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(OperationHandle { cancel: cancel_tx });
                Registration {
                    operations: &self.operations,
                    operation_id: operation_id.to_string(),
                }
            }
        };

        let max_retries = self.policy.retry.max_retries;
        let mut state = MutationAttemptState::new(operation_id, max_retries, self.quota.remaining());
        self.notify(&state);

        if let Decision::Denied { retry_after } = self.limiter.check(key.as_str()) {
            let error = MutationError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
            };
            self.stats.record_rate_limited();
            state.failed(&error);
            self.notify(&state);
            return Err(error);
        }

        if let Some(hooks) = &self.hooks {
            hooks.apply(operation_id, &payload);
        }

        loop {
            if *cancel_rx.borrow() {
                return Err(self.cancelled(operation_id, &payload, &state));
            }

            state.in_flight();
            self.notify(&state);

            self.stats.record_remote_call();
            let outcome = self.remote.call(&payload).await;
            let cancelled = *cancel_rx.borrow();

            let remote_error = match outcome {
                Ok(result) => {
                    let remaining = self.quota.consume();
                    self.stats.record_success();
                    if self.policy.reset_on_success {
                        self.limiter.reset(key.as_str());
                    }
                    state.succeeded(remaining);
                    self.notify(&state);
                    debug!(operation_id, remaining_quota = remaining, "Operation succeeded");
                    return Ok(result);
                }
                Err(e) => e,
            };

            if cancelled {
                return Err(self.cancelled(operation_id, &payload, &state));
            }

            let error = match self.classifier.classify(remote_error) {
                MutationError::Retryable(last) if state.retry_count >= max_retries => {
                    self.stats.record_exhausted();
                    warn!(
                        operation_id,
                        attempts = state.retry_count + 1,
                        error = %last,
                        "Retries exhausted"
                    );
                    MutationError::RetriesExhausted {
                        attempts: state.retry_count + 1,
                        last,
                    }
                }
                retryable @ MutationError::Retryable(_) => {
                    let delay = self.backoff.delay_for(state.retry_count);
                    state.backoff(&retryable, delay);
                    self.stats.record_backoff(delay.as_millis() as u64);
                    self.notify(&state);
                    debug!(
                        operation_id,
                        retry = state.retry_count,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %retryable,
                        "Retrying after backoff"
                    );

                    if self.wait_or_cancel(delay, &mut cancel_rx).await {
                        return Err(self.cancelled(operation_id, &payload, &state));
                    }
                    continue;
                }
                terminal => {
                    self.stats.record_terminal_failure();
                    warn!(operation_id, error = %terminal, "Operation failed");
                    terminal
                }
            };

            state.failed(&error);
            self.notify(&state);
            if let Some(hooks) = &self.hooks {
                hooks.rollback(operation_id, &payload, &error);
            }
            return Err(error);
        }
    }

    /// Ask a running operation to stop.
    ///
    /// Cooperative: a pending backoff is abandoned immediately, an outstanding
    /// remote call is left to finish. Returns `false` if no operation with
    /// that id is running, in which case nothing happens.
    pub fn cancel(&self, operation_id: &str) -> bool {
        match self.operations.get(operation_id.trim()) {
            Some(handle) => {
                handle.cancel.send_replace(true);
                info!(mutation = %self.name, operation_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Whether an operation with this id is running.
    pub fn is_in_flight(&self, operation_id: &str) -> bool {
        self.operations.contains_key(operation_id.trim())
    }

    /// Stream of every state transition from now on.
    pub fn subscribe(&self) -> impl Stream<Item = MutationAttemptState> {
        BroadcastStream::new(self.states.subscribe()).filter_map(|state| state.ok())
    }

    /// Current remaining quota.
    pub fn remaining_quota(&self) -> u64 {
        self.quota.remaining()
    }

    /// Overwrite the remaining quota.
    pub fn set_remaining_quota(&self, remaining: u64) {
        self.quota.set(remaining);
    }

    /// Outcome counters so far.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serializable status summary.
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            name: self.name.clone(),
            remaining_quota: self.quota.remaining(),
            in_flight: self.operations.len(),
            stats: self.stats.snapshot(),
            generated_at: Utc::now(),
        }
    }

    /// The mutation's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The limiter gating this mutation.
    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    fn notify(&self, state: &MutationAttemptState) {
        for listener in &self.listeners {
            listener.on_state_change(state);
        }
        // No subscribers is fine.
        let _ = self.states.send(state.clone());
    }

    /// Resolve a cancelled operation. Listeners hear nothing more, but the
    /// optimistic update applied at admission is rolled back.
    fn cancelled(&self, operation_id: &str, payload: &T, state: &MutationAttemptState) -> MutationError {
        self.stats.record_cancelled();
        info!(operation_id, retry_count = state.retry_count, "Operation cancelled");
        let error = MutationError::Cancelled(operation_id.to_string());
        if let Some(hooks) = &self.hooks {
            hooks.rollback(operation_id, payload, &error);
        }
        error
    }

    /// Sleep for `delay`; returns `true` if cancelled first.
    async fn wait_or_cancel(&self, delay: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
        let cancelled = async {
            let closed = cancel_rx.wait_for(|cancelled| *cancelled).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => true,
            _ = self.clock.sleep(delay) => false,
        }
    }
}

/// Builder for [`ThrottledMutation`].
pub struct ThrottledMutationBuilder<T, R> {
    name: String,
    remote: Arc<dyn RemoteCall<T, R>>,
    policy: PolicyConfig,
    limiter: Option<Arc<SlidingWindowLimiter>>,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    key_fn: Option<KeyFn<T>>,
    validator: Option<Validator<T>>,
    listeners: Vec<Arc<dyn StateListener>>,
    hooks: Option<Arc<dyn OptimisticHooks<T>>>,
}

impl<T, R> ThrottledMutationBuilder<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    fn new(name: impl Into<String>, remote: Arc<dyn RemoteCall<T, R>>) -> Self {
        Self {
            name: name.into(),
            remote,
            policy: PolicyConfig::default(),
            limiter: None,
            clock: None,
            classifier: None,
            key_fn: None,
            validator: None,
            listeners: Vec::new(),
            hooks: None,
        }
    }

    /// Limiter, retry and quota settings.
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Gate on an existing limiter instead of a private one built from the policy.
    pub fn limiter(mut self, limiter: Arc<SlidingWindowLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Time source for backoff (and for the private limiter).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Decides which remote errors are retried. Defaults to the policy's
    /// retryable statuses.
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// How the limiter key is derived. Defaults to the operation id.
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&str, &T) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Reject malformed payloads as [`MutationError::InvalidInput`].
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Add a synchronous state listener. May be called more than once.
    pub fn listener(mut self, listener: Arc<dyn StateListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Optimistic apply/rollback hooks.
    pub fn hooks(mut self, hooks: Arc<dyn OptimisticHooks<T>>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Build the mutation, filling in defaults for anything not set.
    pub fn build(self) -> ThrottledMutation<T, R> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let limiter = self.limiter.unwrap_or_else(|| {
            Arc::new(SlidingWindowLimiter::with_clock(
                self.policy.limiter.clone(),
                Arc::new(AttemptStore::new()),
                clock.clone(),
            ))
        });
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(StatusClassifier::from_config(&self.policy.retry)));
        let key_fn = self
            .key_fn
            .unwrap_or_else(|| Arc::new(|operation_id: &str, _: &T| Some(operation_id.to_string())));
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        ThrottledMutation {
            name: self.name,
            backoff: BackoffPolicy::from_config(&self.policy.retry),
            quota: Quota::new(self.policy.initial_quota),
            policy: self.policy,
            limiter,
            remote: self.remote,
            classifier,
            clock,
            key_fn,
            validator: self.validator,
            listeners: self.listeners,
            hooks: self.hooks,
            states,
            stats: MutationStats::default(),
            operations: DashMap::new(),
        }
    }
}
