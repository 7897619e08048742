//! Circuit breaker guarding calls to a single dependency
//!
//! State machine:
//! - **Closed**: calls pass through. Each counted failure increments `failure_count`; reaching
//!   `failure_threshold` opens the circuit. A success resets the count and clears `last_error`.
//! - **Open**: calls are rejected with a `CircuitBreakerOpen` error wrapping the error that
//!   opened the circuit. The first admission check after `open_timeout` moves to HalfOpen and
//!   lets that call through.
//! - **HalfOpen**: the call that triggered the transition is let through with the trial counter
//!   at zero; after it, up to `half_open_max_attempts` further trial calls are admitted. A success
//!   closes the circuit and a counted failure reopens it. Once every trial is used without a
//!   decisive result, the next admission check reopens it.
//!
//! Only kinds for which [`ErrorKind::should_count_for_circuit_breaker`] holds affect the
//! breaker. Business errors (cancellation included) and `CircuitBreakerOpen` itself are ignored.
//!
//! All mutable state sits behind one `tokio::sync::Mutex`, so concurrent callers never race on
//! the increment-and-compare and never block a runtime worker while waiting. The state-change
//! observer runs after that lock is released, on every transition edge and never otherwise.
//!
//! [`ErrorKind::should_count_for_circuit_breaker`]: crate::ErrorKind::should_count_for_circuit_breaker

use crate::clock::{Clock, MonotonicClock};
use crate::{Error, Outcome};
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tower_layer::Layer;
use tower_service::Service;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the open timeout elapses.
    Open,
    /// Admits a limited number of trial calls to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("half_open_max_attempts must be > 0 (got {provided})")]
    InvalidHalfOpenLimit { provided: usize },
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    open_timeout: Duration,
    half_open_max_attempts: usize,
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: usize,
        open_timeout: Duration,
        half_open_max_attempts: usize,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if half_open_max_attempts == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        Ok(Self { failure_threshold, open_timeout, half_open_max_attempts })
    }

    /// Counted failures before opening from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// How long to stay Open before probing.
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    /// Trial calls admitted while HalfOpen, after the transition call.
    pub fn half_open_max_attempts(&self) -> usize {
        self.half_open_max_attempts
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_timeout: Duration::from_secs(30), half_open_max_attempts: 1 }
    }
}

/// Payload handed to the state-change observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_count: usize,
    pub last_error: Option<Error>,
}

/// Observer invoked on every state transition. Keep it fast; it runs on the caller's task.
pub type StateChangeCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: usize,
    pub last_error: Option<Error>,
    pub half_open_attempts_used: usize,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: usize,
    last_error: Option<Error>,
    opened_at_millis: u64,
    half_open_attempts_used: usize,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_error: None,
            opened_at_millis: 0,
            half_open_attempts_used: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) -> Option<StateChange> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(StateChange {
            from,
            to,
            failure_count: self.failure_count,
            last_error: self.last_error.clone(),
        })
    }

    fn open(&mut self, now_millis: u64) -> Option<StateChange> {
        self.opened_at_millis = now_millis;
        self.half_open_attempts_used = 0;
        self.transition(CircuitState::Open)
    }

    fn rejection(&self) -> Error {
        Error::circuit_breaker_open(self.last_error.clone())
    }

    fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            last_error: self.last_error.clone(),
            half_open_attempts_used: self.half_open_attempts_used,
        }
    }
}

/// Circuit breaker policy guarding an async operation.
///
/// Clones share the same underlying state via `Arc`, so every handle observes and affects the
/// same circuit. Create one per downstream dependency.
#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<RwLock<Option<StateChangeCallback>>>,
    name: Cow<'static, str>,
}

impl fmt::Debug for CircuitBreakerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("observer", &"<callback>")
            .finish()
    }
}

impl CircuitBreakerPolicy {
    /// Create a breaker; fails fast on a zero threshold or zero half-open limit.
    ///
    /// # Examples
    /// ```
    /// use tripwire::CircuitBreakerPolicy;
    /// use std::time::Duration;
    /// let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30), 1).unwrap();
    /// ```
    pub fn new(
        failure_threshold: usize,
        open_timeout: Duration,
        half_open_max_attempts: usize,
    ) -> Result<Self, CircuitBreakerError> {
        CircuitBreakerConfig::new(failure_threshold, open_timeout, half_open_max_attempts)
            .map(Self::with_config)
    }

    /// Create a breaker from an already validated config.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState::new())),
            config,
            clock: Arc::new(MonotonicClock::default()),
            observer: Arc::new(RwLock::new(None)),
            name: Cow::Borrowed("default"),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name used in log events, typically the dependency being protected.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Install the state-change observer (builder style).
    pub fn on_state_changed<F>(self, callback: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.set_on_state_changed(callback);
        self
    }

    /// Install or replace the state-change observer on a live breaker (affects all clones).
    pub fn set_on_state_changed<F>(&self, callback: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Remove the state-change observer.
    pub fn clear_on_state_changed(&self) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn failure_count(&self) -> usize {
        self.state.lock().await.failure_count
    }

    pub async fn last_error(&self) -> Option<Error> {
        self.state.lock().await.last_error.clone()
    }

    /// All observable fields read under a single lock acquisition.
    pub async fn snapshot(&self) -> CircuitSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Admission check. `Ok(true)` lets the caller proceed; otherwise the error is a
    /// `CircuitBreakerOpen` wrapping the error that opened the circuit.
    ///
    /// May move Open → HalfOpen once the open timeout elapsed, or HalfOpen → Open once every
    /// trial call was used without a decisive result.
    pub async fn should_allow_request(&self) -> Outcome<bool> {
        let now = self.clock.now_millis();
        let timeout_millis = u64::try_from(self.config.open_timeout.as_millis()).unwrap_or(u64::MAX);

        let (decision, change) = {
            let mut s = self.state.lock().await;
            match s.state {
                CircuitState::Closed => (Ok(true), None),
                CircuitState::Open => {
                    if now.saturating_sub(s.opened_at_millis) >= timeout_millis {
                        // this call goes through outside the trial budget
                        s.half_open_attempts_used = 0;
                        let change = s.transition(CircuitState::HalfOpen);
                        (Ok(true), change)
                    } else {
                        (Err(s.rejection()), None)
                    }
                }
                CircuitState::HalfOpen => {
                    if s.half_open_attempts_used >= self.config.half_open_max_attempts {
                        let change = s.open(now);
                        (Err(s.rejection()), change)
                    } else {
                        s.half_open_attempts_used += 1;
                        tracing::debug!(
                            circuit = %self.name,
                            trial = s.half_open_attempts_used,
                            max = self.config.half_open_max_attempts,
                            "Circuit breaker: half-open trial admitted"
                        );
                        (Ok(true), None)
                    }
                }
            }
        };

        self.publish(change);
        decision
    }

    /// Record a failed call. Kinds the breaker does not count leave every field untouched.
    pub async fn record_failure(&self, error: &Error) {
        if !error.kind().should_count_for_circuit_breaker() {
            tracing::trace!(circuit = %self.name, kind = %error.kind(), "Circuit breaker: failure ignored");
            return;
        }
        let now = self.clock.now_millis();

        let change = {
            let mut s = self.state.lock().await;
            s.failure_count = s.failure_count.saturating_add(1);
            s.last_error = Some(error.clone());
            match s.state {
                CircuitState::Closed if s.failure_count >= self.config.failure_threshold => {
                    s.open(now)
                }
                CircuitState::HalfOpen => s.open(now),
                _ => None,
            }
        };

        self.publish(change);
    }

    /// Record a successful call: clears the failure history and closes a HalfOpen circuit.
    pub async fn record_success(&self) {
        let change = {
            let mut s = self.state.lock().await;
            s.failure_count = 0;
            s.last_error = None;
            if s.state == CircuitState::HalfOpen {
                s.half_open_attempts_used = 0;
                s.transition(CircuitState::Closed)
            } else {
                None
            }
        };

        self.publish(change);
    }

    /// Force the circuit Closed and clear all failure history.
    pub async fn reset(&self) {
        let change = {
            let mut s = self.state.lock().await;
            s.failure_count = 0;
            s.last_error = None;
            s.opened_at_millis = 0;
            s.half_open_attempts_used = 0;
            s.transition(CircuitState::Closed)
        };

        self.publish(change);
    }

    /// Run `operation` under breaker protection.
    ///
    /// A rejected call returns the admission error without invoking the operation. Otherwise the
    /// operation's outcome is recorded and returned unchanged.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Outcome<T>
    where
        T: Send,
        Fut: Future<Output = Outcome<T>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        self.should_allow_request().await?;
        let result = operation().await;
        let failure = result.as_ref().err().cloned();
        self.record(failure).await;
        result
    }

    /// [`execute`](Self::execute) for operations that take an input value.
    pub async fn execute_with<I, T, Fut, Op>(&self, input: I, operation: Op) -> Outcome<T>
    where
        I: Send,
        T: Send,
        Fut: Future<Output = Outcome<T>> + Send,
        Op: FnOnce(I) -> Fut + Send,
    {
        self.execute(move || operation(input)).await
    }

    /// [`execute`](Self::execute) for synchronous operations.
    pub async fn execute_sync<T, Op>(&self, operation: Op) -> Outcome<T>
    where
        T: Send,
        Op: FnOnce() -> Outcome<T> + Send,
    {
        self.should_allow_request().await?;
        let result = operation();
        let failure = result.as_ref().err().cloned();
        self.record(failure).await;
        result
    }

    // owned so the caller's future never holds a borrow of `T` across the lock await
    async fn record(&self, failure: Option<Error>) {
        match failure {
            None => self.record_success().await,
            Some(e) => self.record_failure(&e).await,
        }
    }

    /// Log and notify a transition. Always called with the state lock released.
    fn publish(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };

        match (change.from, change.to) {
            (CircuitState::Closed, CircuitState::Open) => tracing::error!(
                circuit = %self.name,
                failures = change.failure_count,
                threshold = self.config.failure_threshold,
                last_error = ?change.last_error.as_ref().map(Error::code),
                "Circuit breaker → open"
            ),
            (CircuitState::HalfOpen, CircuitState::Open) => tracing::warn!(
                circuit = %self.name,
                failures = change.failure_count,
                "Circuit breaker: trial failed → open"
            ),
            (_, CircuitState::HalfOpen) => {
                tracing::info!(circuit = %self.name, "Circuit breaker → half-open")
            }
            (from, CircuitState::Closed) => {
                tracing::info!(circuit = %self.name, from = %from, "Circuit breaker → closed")
            }
            (from, to) => tracing::info!(circuit = %self.name, %from, %to, "Circuit breaker transition"),
        }

        let observer = self.observer.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(callback) = observer {
            callback(&change);
        }
    }
}

/// Tower layer running every request of the wrapped service through a shared breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreakerPolicy,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: CircuitBreakerPolicy) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService { inner, breaker: self.breaker.clone() }
    }
}

/// Service produced by [`CircuitBreakerLayer`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreakerPolicy,
}

impl<S> CircuitBreakerService<S> {
    pub fn breaker(&self) -> &CircuitBreakerPolicy {
        &self.breaker
    }
}

impl<S, Request> Service<Request> for CircuitBreakerService<S>
where
    Request: Send + 'static,
    S: Service<Request, Error = Error> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = Error;
    type Future = BoxFuture<'static, Outcome<S::Response>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Outcome<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // take the instance that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let breaker = self.breaker.clone();
        Box::pin(async move { breaker.execute(move || inner.call(request)).await })
    }
}
