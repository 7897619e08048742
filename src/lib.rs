#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tripwire
//!
//! Result-based error handling for async Rust: a classified error model, a circuit breaker, and a
//! retry engine with backoff. Failures are values; nothing here panics or unwinds to signal one.
//!
//! ## Features
//!
//! - **Classified errors**: every [`Error`] has an [`ErrorKind`] that decides whether it is
//!   retried and whether it trips a breaker
//! - **Circuit breaker** with half-open probing, state-change observer and a tower layer
//! - **Retry engine** driven by a pure decision function, with exponential backoff and jitter
//! - **Deterministic tests** through injectable [`Clock`] and [`Sleeper`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use tripwire::{with_retry, CircuitBreakerPolicy, Error, Outcome, RetryPolicies};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30), 1).unwrap();
//! let policy = RetryPolicies::transient_errors(3, Duration::from_millis(10));
//!
//! let result: Outcome<u32> = with_retry(
//!     Ok(7),
//!     |id: u32| {
//!         let breaker = breaker.clone();
//!         async move { breaker.execute(|| async move { Ok::<_, Error>(id * 6) }).await }
//!     },
//!     &policy,
//!     None,
//! )
//! .await;
//! assert_eq!(result, Ok(42));
//! # });
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod error;
pub mod jitter;
pub mod prelude;
pub mod retry;
pub mod sleeper;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerLayer, CircuitBreakerPolicy,
    CircuitBreakerService, CircuitSnapshot, CircuitState, StateChange, StateChangeCallback,
};
pub use circuit_breaker_registry::{
    CircuitBreakerRegistry, InMemoryCircuitBreakerRegistry, RegistryError,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Chain, Error, ErrorKind, Outcome, CIRCUIT_BREAKER_OPEN_CODE};
pub use jitter::Jitter;
pub use retry::{
    with_retry, RetryAttempt, RetryExecutor, RetryExt, RetryObserver, RetryPolicies, RetryPolicy,
};
pub use sleeper::{ClockSleeper, InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
