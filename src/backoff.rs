//! Backoff strategies used by retry policies.
//!
//! Attempt numbers are 1-based and name the attempt that just failed: `delay(1)` is the wait
//! before the second call. `delay(0)` is always zero.
//!
//! ```rust
//! use std::time::Duration;
//! use tripwire::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(1000));
//! assert_eq!(backoff.delay(1), Duration::from_millis(1000));
//! assert_eq!(backoff.delay(2), Duration::from_millis(2000));
//! assert_eq!(backoff.delay(3), Duration::from_millis(4000));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`] (1 day).

use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant { delay: Duration },
    /// `base × attempt`, optionally capped.
    Linear { base: Duration, max: Option<Duration> },
    /// `base × 2^(attempt-1)`, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap linear or exponential delays.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self {
            Backoff::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
            Backoff::Linear { base, .. } if max < base => {
                Err(BackoffError::MaxLessThanBase { base, max })
            }
            Backoff::Exponential { base, .. } if max < base => {
                Err(BackoffError::MaxLessThanBase { base, max })
            }
            Backoff::Linear { base, .. } => Ok(Backoff::Linear { base, max: Some(max) }),
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(max) }),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let (raw, max) = match *self {
            Backoff::Constant { delay } => (delay, None),
            Backoff::Linear { base, max } => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                (base.checked_mul(factor).unwrap_or(MAX_BACKOFF), max)
            }
            Backoff::Exponential { base, max } => {
                let exponent = (attempt - 1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                (Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64), max)
            }
        };
        max.map_or(raw, |m| raw.min(m)).min(MAX_BACKOFF)
    }
}
