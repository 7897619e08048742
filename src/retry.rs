//! Retry engine for fallible async operations.
//!
//! Semantics:
//! - A [`RetryPolicy`] is a pure decision function `(attempt, &error) -> Outcome<Duration>`:
//!   `Ok(delay)` means "retry after `delay`", `Err(error)` means "give up".
//! - Attempts are 1-based; `attempt` names the call that just failed.
//! - A failed starting outcome is returned untouched: the operation is never invoked and the
//!   policy is never consulted.
//! - Giving up returns the failure of the last attempt exactly as the operation produced it.
//!   There is no synthesized "retries exhausted" error; the cause chain survives intact.
//! - The wait between attempts goes through a [`Sleeper`] (tokio timer in production), so no
//!   worker thread is blocked.
//! - The optional observer sees `(attempt, error, delay)` before every wait, and once more with a
//!   zero delay when the engine gives up.
//!
//! Termination is the policy's job. A custom policy that always answers "retry" loops forever;
//! the engine does not add a safety net.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use tripwire::{with_retry, Error, RetryPolicies};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicies::transient_errors(3, Duration::from_millis(1));
//! let result = with_retry(Ok(21), |n: i32| async move { Ok::<_, Error>(n * 2) }, &policy, None).await;
//! assert_eq!(result, Ok(42));
//! # });
//! ```

use crate::{Backoff, Error, Jitter, Outcome, Sleeper, TokioSleeper};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type DecideFn = dyn Fn(usize, &Error) -> Outcome<Duration> + Send + Sync;

/// Observer invoked around retries.
pub type RetryObserver = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Decision function consulted after each failed attempt. Stateless and cheap to clone.
#[derive(Clone)]
pub struct RetryPolicy {
    decide: Arc<DecideFn>,
    jitter: Jitter,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("decide", &"<fn>")
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl RetryPolicy {
    /// Fully custom policy.
    pub fn new<F>(decide: F) -> Self
    where
        F: Fn(usize, &Error) -> Outcome<Duration> + Send + Sync + 'static,
    {
        Self { decide: Arc::new(decide), jitter: Jitter::None }
    }

    /// Randomize the delays this policy hands out.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Evaluate the policy for a failed attempt.
    pub fn decide(&self, attempt: usize, error: &Error) -> Outcome<Duration> {
        (self.decide)(attempt, error).map(|delay| self.jitter.apply(delay))
    }
}

/// Factories for common policies.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicies;

impl RetryPolicies {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

    /// Retry transient kinds only, with exponential backoff `base_delay × 2^(attempt-1)`,
    /// while `attempt < max_attempts`.
    pub fn transient_errors(max_attempts: usize, base_delay: Duration) -> RetryPolicy {
        Self::from_backoff(
            max_attempts,
            |e: &Error| e.kind().is_transient(),
            Backoff::exponential(base_delay),
        )
    }

    /// `transient_errors(3, 1000ms)`: waits of 1s then 2s.
    pub fn default_transient() -> RetryPolicy {
        Self::transient_errors(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BASE_DELAY)
    }

    /// Retry while `attempt < max_attempts` and `should_retry(error)`, waiting
    /// `delay_strategy(attempt)`.
    pub fn custom<P, D>(max_attempts: usize, should_retry: P, delay_strategy: D) -> RetryPolicy
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
        D: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        RetryPolicy::new(move |attempt, error| {
            if attempt < max_attempts && should_retry(error) {
                Ok(delay_strategy(attempt))
            } else {
                Err(error.clone())
            }
        })
    }

    /// [`custom`](Self::custom) with delays taken from a [`Backoff`] schedule.
    pub fn from_backoff<P>(max_attempts: usize, should_retry: P, backoff: Backoff) -> RetryPolicy
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        Self::custom(max_attempts, should_retry, move |attempt| backoff.delay(attempt))
    }
}

/// Observer payload: one failed attempt and what the engine does about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based number of the attempt that failed.
    pub attempt: usize,
    /// Failure returned by that attempt.
    pub error: Error,
    /// Wait before the next attempt; zero when the engine gives up.
    pub delay: Duration,
    gave_up: bool,
}

impl RetryAttempt {
    /// Whether this notification marks the end of retrying. A zero-delay policy also reports
    /// `delay == 0` on ordinary retries, so check this rather than the delay.
    pub fn is_final(&self) -> bool {
        self.gave_up
    }
}

/// Re-run `operation` on the success value of `start` until it succeeds or `policy` gives up.
///
/// Each attempt gets a clone of the starting value. Waits use the tokio timer; use
/// [`RetryExecutor`] to inject a different [`Sleeper`].
pub async fn with_retry<T, U, Fut, Op>(
    start: Outcome<T>,
    operation: Op,
    policy: &RetryPolicy,
    on_retry_attempt: Option<&(dyn Fn(&RetryAttempt) + Send + Sync)>,
) -> Outcome<U>
where
    T: Clone,
    Fut: Future<Output = Outcome<U>>,
    Op: FnMut(T) -> Fut,
{
    retry_loop(start, operation, policy, &TokioSleeper, on_retry_attempt).await
}

/// Method-call form of [`with_retry`] for call sites that already hold an [`Outcome`].
///
/// ```rust
/// use std::time::Duration;
/// use tripwire::{Error, Outcome, RetryExt, RetryPolicies};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let policy = RetryPolicies::transient_errors(2, Duration::ZERO);
/// let parsed: Outcome<u16> = Ok::<_, Error>(String::from("8080"))
///     .retry(
///         |s: String| async move { s.parse::<u16>().map_err(|e| Error::validation("port", e.to_string())) },
///         &policy,
///     )
///     .await;
/// assert_eq!(parsed, Ok(8080));
/// # });
/// ```
pub trait RetryExt<T> {
    fn retry<U, Fut, Op>(self, operation: Op, policy: &RetryPolicy) -> impl Future<Output = Outcome<U>>
    where
        T: Clone,
        Fut: Future<Output = Outcome<U>>,
        Op: FnMut(T) -> Fut;
}

impl<T> RetryExt<T> for Outcome<T> {
    fn retry<U, Fut, Op>(self, operation: Op, policy: &RetryPolicy) -> impl Future<Output = Outcome<U>>
    where
        T: Clone,
        Fut: Future<Output = Outcome<U>>,
        Op: FnMut(T) -> Fut,
    {
        with_retry(self, operation, policy, None)
    }
}

async fn retry_loop<T, U, Fut, Op>(
    start: Outcome<T>,
    mut operation: Op,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    observer: Option<&(dyn Fn(&RetryAttempt) + Send + Sync)>,
) -> Outcome<U>
where
    T: Clone,
    Fut: Future<Output = Outcome<U>>,
    Op: FnMut(T) -> Fut,
{
    let value = start?;
    let mut attempt = 1;

    loop {
        let error = match operation(value.clone()).await {
            Ok(out) => return Ok(out),
            Err(error) => error,
        };

        match policy.decide(attempt, &error) {
            Ok(delay) => {
                tracing::debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    kind = %error.kind(),
                    code = error.code(),
                    "retrying after failure"
                );
                if let Some(observer) = observer {
                    observer(&RetryAttempt { attempt, error, delay, gave_up: false });
                }
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(_) => {
                if attempt > 1 {
                    tracing::warn!(attempts = attempt, kind = %error.kind(), "giving up after retries");
                }
                if let Some(observer) = observer {
                    observer(&RetryAttempt {
                        attempt,
                        error: error.clone(),
                        delay: Duration::ZERO,
                        gave_up: true,
                    });
                }
                return Err(error);
            }
        }
    }
}

/// A retry policy bundled with its sleeper and observer.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    observer: Option<RetryObserver>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("sleeper", &self.sleeper)
            .field("observer", &self.observer.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, sleeper: Arc::new(TokioSleeper), observer: None }
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Register the per-attempt observer.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryAttempt) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry an operation that takes no input.
    pub async fn execute<U, Fut, Op>(&self, mut operation: Op) -> Outcome<U>
    where
        Fut: Future<Output = Outcome<U>>,
        Op: FnMut() -> Fut,
    {
        self.execute_with(Ok(()), move |()| operation()).await
    }

    /// Retry `operation` on the success value of `start`; see [`with_retry`].
    pub async fn execute_with<T, U, Fut, Op>(&self, start: Outcome<T>, operation: Op) -> Outcome<U>
    where
        T: Clone,
        Fut: Future<Output = Outcome<U>>,
        Op: FnMut(T) -> Fut,
    {
        retry_loop(start, operation, &self.policy, self.sleeper.as_ref(), self.observer.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn failing_n_times(
        n: usize,
        err: Error,
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Outcome<&'static str>> {
        move || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if attempt < n { Err(err.clone()) } else { Ok("done") })
        }
    }

    #[test]
    fn transient_policy_decisions() {
        let policy = RetryPolicies::transient_errors(3, Duration::from_millis(1000));
        let timeout = Error::timeout("t", "slow");

        assert_eq!(policy.decide(1, &timeout), Ok(Duration::from_millis(1000)));
        assert_eq!(policy.decide(2, &timeout), Ok(Duration::from_millis(2000)));
        assert_eq!(policy.decide(3, &timeout), Err(timeout.clone()));

        let db = Error::database("db", "down");
        assert_eq!(policy.decide(1, &db), Err(db.clone()), "infrastructure is not retried");
        let invalid = Error::validation("v", "bad");
        assert_eq!(policy.decide(1, &invalid), Err(invalid.clone()));
    }

    #[test]
    fn default_transient_matches_documented_values() {
        let policy = RetryPolicies::default_transient();
        let err = Error::unavailable("u", "down");
        assert_eq!(policy.decide(1, &err), Ok(Duration::from_secs(1)));
        assert_eq!(policy.decide(2, &err), Ok(Duration::from_secs(2)));
        assert!(policy.decide(3, &err).is_err());
    }

    #[test]
    fn custom_policy_uses_predicate_and_strategy() {
        let policy = RetryPolicies::custom(
            4,
            |e| e.kind() == ErrorKind::Database,
            |attempt| Duration::from_millis(attempt as u64 * 7),
        );
        let db = Error::database("db", "deadlock");
        assert_eq!(policy.decide(3, &db), Ok(Duration::from_millis(21)));
        assert!(policy.decide(4, &db).is_err());
        assert!(policy.decide(1, &Error::timeout("t", "x")).is_err());
    }

    #[test]
    fn jitter_never_exceeds_policy_delay() {
        let policy = RetryPolicies::transient_errors(10, Duration::from_millis(100))
            .with_jitter(Jitter::full());
        let err = Error::timeout("t", "x");
        for attempt in 1..5 {
            let delay = policy.decide(attempt, &err).unwrap();
            assert!(delay <= Duration::from_millis(100 * 2u64.pow(attempt as u32 - 1)));
        }
    }

    #[tokio::test]
    async fn failed_start_is_propagated_without_invoking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let consulted = Arc::new(AtomicUsize::new(0));
        let consulted_clone = consulted.clone();
        let policy = RetryPolicy::new(move |_, _| {
            consulted_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Duration::ZERO)
        });
        let start_err = Error::validation("input", "missing field");

        let calls_clone = calls.clone();
        let result: Outcome<u8> = RetryExecutor::new(policy)
            .with_sleeper(InstantSleeper)
            .execute_with(Err::<u8, _>(start_err.clone()), move |v| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async move { Ok(v) }
            })
            .await;

        assert_eq!(result, Err(start_err));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(consulted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn each_attempt_receives_the_starting_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let result = RetryExecutor::new(RetryPolicies::transient_errors(3, Duration::ZERO))
            .with_sleeper(InstantSleeper)
            .execute_with(Ok(String::from("order-7")), move |id: String| {
                let mut seen = seen_clone.lock().unwrap();
                seen.push(id.clone());
                let fail = seen.len() < 2;
                async move {
                    if fail {
                        Err(Error::timeout("t", "slow"))
                    } else {
                        Ok(id.len())
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(*seen.lock().unwrap(), vec!["order-7".to_string(), "order-7".to_string()]);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_original_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Outcome<()> = RetryExecutor::new(RetryPolicies::transient_errors(
            3,
            Duration::from_millis(5),
        ))
        .with_sleeper(InstantSleeper)
        .execute(move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            let err = Error::timeout("rpc.deadline", format!("attempt {n} timed out"))
                .with_inner(Error::unavailable("net", "socket reset"));
            async move { Err(err) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), "attempt 2 timed out");
        assert_eq!(err.root_cause().code(), "net");
    }

    #[tokio::test]
    async fn observer_sees_retries_and_final_notification() {
        let sleeper = TrackingSleeper::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = RetryExecutor::new(RetryPolicies::transient_errors(3, Duration::from_millis(10)))
            .with_sleeper(sleeper.clone())
            .on_retry(move |a| sink.lock().unwrap().push((a.attempt, a.delay, a.is_final())))
            .execute(failing_n_times(usize::MAX, Error::timeout("t", "x"), calls.clone()))
            .await;

        assert!(result.is_err());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (1, Duration::from_millis(10), false),
                (2, Duration::from_millis(20), false),
                (3, Duration::ZERO, true),
            ]
        );
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
    }

    #[tokio::test]
    async fn success_after_retries_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sleeper = TrackingSleeper::new();
        let result = RetryExecutor::new(RetryPolicies::transient_errors(5, Duration::from_millis(1)))
            .with_sleeper(sleeper.clone())
            .execute(failing_n_times(2, Error::too_many_requests("rate", "slow down"), calls.clone()))
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.calls().len(), 2);
    }

    #[tokio::test]
    async fn retry_ext_skips_failed_start() {
        let policy = RetryPolicies::transient_errors(3, Duration::ZERO);
        let start: Outcome<u32> = Err(Error::not_found("user", "no such user"));
        let calls = AtomicUsize::new(0);
        let result: Outcome<u32> = start
            .retry(
                |id| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(id) }
                },
                &policy,
            )
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn free_function_waits_on_tokio_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();
        let mut op = failing_n_times(1, Error::unavailable("u", "down"), calls.clone());

        let result =
            with_retry(Ok(()), |()| op(), &RetryPolicies::transient_errors(3, Duration::from_secs(2)), None)
                .await;

        assert_eq!(result, Ok("done"));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
