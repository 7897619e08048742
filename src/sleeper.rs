//! How the retry engine waits between attempts.
//!
//! [`TokioSleeper`] waits on the tokio timer and never blocks a worker thread. The others exist
//! so retry schedules can be tested without waiting:
//!
//! - [`InstantSleeper`] returns at once
//! - [`TrackingSleeper`] returns at once and records every requested delay
//! - [`ClockSleeper`] moves a [`ManualClock`] forward by the delay, so a breaker driven by the
//!   same clock sees the time pass

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};

use crate::clock::ManualClock;

pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _: Duration) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}

/// Records requested delays instead of waiting. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, oldest first.
    pub fn calls(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }

    pub fn clear(&self) {
        self.delays.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.delays.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(duration);
        future::ready(()).boxed()
    }
}

/// Advances a [`ManualClock`] by each requested delay and returns at once.
#[derive(Debug, Clone)]
pub struct ClockSleeper {
    clock: ManualClock,
}

impl ClockSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

impl Sleeper for ClockSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.clock.advance(duration);
        future::ready(()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_timer() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn instant_sleeper_returns_immediately() {
        let start = std::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(3600)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn tracking_sleeper_records_in_order() {
        let sleeper = TrackingSleeper::new();
        let shared = sleeper.clone();

        sleeper.sleep(Duration::from_millis(100)).await;
        shared.sleep(Duration::from_millis(200)).await;

        assert_eq!(sleeper.calls(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(shared.total(), Duration::from_millis(300));
        sleeper.clear();
        assert!(shared.calls().is_empty());
    }

    #[tokio::test]
    async fn clock_sleeper_moves_virtual_time() {
        let clock = ManualClock::new();
        let sleeper = ClockSleeper::new(clock.clone());
        sleeper.sleep(Duration::from_millis(400)).await;
        sleeper.sleep(Duration::from_millis(100)).await;
        assert_eq!(clock.now_millis(), 500);
    }
}
