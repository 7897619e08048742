//! Convenient re-exports for common tripwire types.
pub use crate::{
    backoff::Backoff,
    circuit_breaker::{CircuitBreakerLayer, CircuitBreakerPolicy, CircuitState},
    error::{Error, ErrorKind, Outcome},
    jitter::Jitter,
    retry::{with_retry, RetryExecutor, RetryPolicies, RetryPolicy},
};
