//! Jitter for retry delays
//!
//! - `None`: exact delays; the default, so documented backoff sequences hold.
//! - `Full`: uniform in `[0, delay]`, spreads load the most.
//! - `Equal`: uniform in `[delay/2, delay]`, keeps a floor while adding randomness.
//!
//! Applied to a policy with [`RetryPolicy::with_jitter`](crate::RetryPolicy::with_jitter).

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    #[default]
    None,
    Full,
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Randomize `delay` with a caller-supplied RNG (deterministic in tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        // saturate absurd durations instead of panicking on the cast
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_millis(1234);
        assert_eq!(Jitter::None.apply(delay), delay);
        assert_eq!(Jitter::default(), Jitter::None);
    }

    #[test]
    fn full_jitter_is_between_zero_and_delay() {
        let delay = Duration::from_secs(1);
        for _ in 0..100 {
            assert!(Jitter::full().apply(delay) <= delay);
        }
    }

    #[test]
    fn equal_jitter_keeps_a_floor() {
        let delay = Duration::from_millis(1000);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let jittered = Jitter::equal().apply_with_rng(delay, &mut rng);
            assert!(jittered >= Duration::from_millis(500));
            assert!(jittered <= delay);
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::equal().apply(Duration::ZERO), Duration::ZERO);
    }
}
