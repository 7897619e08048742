use std::sync::{Arc, Mutex};
use std::time::Duration;

use tripwire::{
    CircuitBreakerPolicy, CircuitState, Error, ErrorKind, ManualClock, CIRCUIT_BREAKER_OPEN_CODE,
};

fn breaker_with_clock(threshold: usize, clock: &ManualClock) -> CircuitBreakerPolicy {
    CircuitBreakerPolicy::new(threshold, Duration::from_secs(30), 1)
        .unwrap()
        .with_clock(clock.clone())
}

fn business_errors() -> Vec<Error> {
    vec![
        Error::validation("order.qty", "quantity must be positive"),
        Error::business("order.limit", "credit limit exceeded"),
        Error::not_found("order", "no such order"),
        Error::unauthorized("auth", "token expired"),
        Error::permission("auth", "not an admin"),
        Error::conflict("order.version", "stale version"),
        Error::cancelled("request", "client went away"),
    ]
}

#[tokio::test]
async fn threshold_property_holds_for_several_thresholds() {
    for threshold in 1..=6 {
        let clock = ManualClock::new();
        let breaker = breaker_with_clock(threshold, &clock);
        for _ in 0..threshold - 1 {
            breaker.record_failure(&Error::timeout("rpc", "deadline exceeded")).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed, "threshold {threshold}");

        breaker.record_failure(&Error::database("db", "connection lost")).await;
        assert_eq!(breaker.state().await, CircuitState::Open, "threshold {threshold}");
        assert_eq!(breaker.failure_count().await, threshold);
    }
}

#[tokio::test]
async fn business_errors_never_touch_the_breaker() {
    let clock = ManualClock::new();
    let breaker = breaker_with_clock(1, &clock);

    for error in business_errors() {
        assert!(error.kind().is_business_error());
        for _ in 0..10 {
            breaker.record_failure(&error).await;
        }
    }

    let snapshot = breaker.snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.last_error, None);
}

#[tokio::test]
async fn business_errors_do_not_disturb_an_open_circuit() {
    let clock = ManualClock::new();
    let breaker = breaker_with_clock(2, &clock);
    let cause = Error::unavailable("inventory", "503 from upstream");
    breaker.record_failure(&cause).await;
    breaker.record_failure(&cause).await;

    for error in business_errors() {
        breaker.record_failure(&error).await;
    }

    assert_eq!(breaker.state().await, CircuitState::Open);
    assert_eq!(breaker.failure_count().await, 2);
    assert_eq!(breaker.last_error().await, Some(cause));
}

#[tokio::test]
async fn rejection_preserves_the_opening_error() {
    let clock = ManualClock::new();
    let breaker = breaker_with_clock(1, &clock);
    let cause = Error::database("orders.db", "deadlock detected")
        .with_inner(Error::unexpected("driver", "socket closed"));
    breaker.record_failure(&cause).await;

    let rejection = breaker.should_allow_request().await.unwrap_err();
    assert_eq!(rejection.kind(), ErrorKind::CircuitBreakerOpen);
    assert_eq!(rejection.code(), CIRCUIT_BREAKER_OPEN_CODE);
    assert!(rejection.message().contains("deadlock detected"));
    assert_eq!(rejection.inner(), Some(&cause));
    assert_eq!(rejection.root_cause().code(), "driver");

    let kinds: Vec<ErrorKind> = rejection.chain().map(Error::kind).collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::CircuitBreakerOpen, ErrorKind::Database, ErrorKind::Unexpected]
    );
    assert!(rejection.to_string().contains("deadlock detected"));
}

#[tokio::test]
async fn half_open_probation_success_and_failure() {
    let clock = ManualClock::new();
    let breaker = breaker_with_clock(1, &clock);

    breaker.record_failure(&Error::timeout("t", "slow")).await;
    clock.advance(Duration::from_secs(30));
    assert_eq!(breaker.should_allow_request().await, Ok(true));
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.failure_count().await, 0);

    breaker.record_failure(&Error::timeout("t", "slow again")).await;
    clock.advance(Duration::from_secs(30));
    assert_eq!(breaker.should_allow_request().await, Ok(true));
    breaker.record_failure(&Error::unavailable("u", "still down")).await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(breaker.should_allow_request().await.is_err(), "open timeout restarts on reopen");
}

#[tokio::test]
async fn half_open_admits_the_transition_call_plus_the_trial_budget() {
    for max_trials in 1..=3 {
        let clock = ManualClock::new();
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(30), max_trials)
            .unwrap()
            .with_clock(clock.clone());
        breaker.record_failure(&Error::timeout("t", "slow")).await;
        clock.advance(Duration::from_secs(30));

        let mut admitted = 0;
        while breaker.should_allow_request().await.is_ok() {
            admitted += 1;
        }
        assert_eq!(admitted, max_trials + 1, "budget {max_trials}");
        assert_eq!(breaker.state().await, CircuitState::Open);
    }
}

#[tokio::test]
async fn scenario_threshold_two_opens_and_rejects() {
    let breaker = CircuitBreakerPolicy::new(2, Duration::from_secs(30), 1).unwrap();

    breaker.record_failure(&Error::unavailable("payments", "connection refused")).await;
    breaker.record_failure(&Error::unavailable("payments", "connection refused")).await;

    assert_eq!(breaker.state().await, CircuitState::Open);
    let err = breaker.should_allow_request().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitBreakerOpen);
}

#[tokio::test]
async fn scenario_real_timeout_moves_to_half_open_then_closes() {
    let breaker = CircuitBreakerPolicy::new(2, Duration::from_millis(100), 1).unwrap();
    breaker.record_failure(&Error::unavailable("payments", "connection refused")).await;
    breaker.record_failure(&Error::unavailable("payments", "connection refused")).await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(breaker.should_allow_request().await, Ok(true));
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.failure_count().await, 0);
}

#[tokio::test]
async fn observer_sees_full_cycle_in_order() {
    let clock = ManualClock::new();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = transitions.clone();
    let breaker = breaker_with_clock(2, &clock)
        .on_state_changed(move |change| sink.lock().unwrap().push((change.from, change.to)));

    breaker.record_failure(&Error::timeout("t", "1")).await;
    breaker.record_failure(&Error::timeout("t", "2")).await;
    clock.advance(Duration::from_secs(31));
    breaker.should_allow_request().await.unwrap();
    breaker.record_failure(&Error::timeout("t", "3")).await;
    clock.advance(Duration::from_secs(31));
    breaker.should_allow_request().await.unwrap();
    breaker.record_success().await;

    use CircuitState::*;
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            (Closed, Open),
            (Open, HalfOpen),
            (HalfOpen, Open),
            (Open, HalfOpen),
            (HalfOpen, Closed)
        ]
    );
}

#[tokio::test]
async fn clones_share_one_circuit() {
    let clock = ManualClock::new();
    let breaker = breaker_with_clock(2, &clock);
    let a = breaker.clone();
    let b = breaker.clone();

    a.record_failure(&Error::unavailable("u", "down")).await;
    b.record_failure(&Error::unavailable("u", "down")).await;

    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_callers_through_execute() {
    let clock = ManualClock::new();
    let breaker = breaker_with_clock(100, &clock);

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        if i % 2 == 0 {
                            Err::<(), _>(Error::timeout("t", "slow"))
                        } else {
                            Err(Error::validation("v", "bad input"))
                        }
                    })
                    .await
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        assert!(result.unwrap().is_err());
    }

    assert_eq!(breaker.failure_count().await, 25);
    assert_eq!(breaker.state().await, CircuitState::Closed);
}
