//! Integration tests for the dispatcher

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::{sync::Arc, time::Duration};

use herald_common::Signal;
use herald_delivery::{
    CircuitState, ConfigError, DeliveryState, DispatchConfig, Dispatcher, Outcome, ProviderFailure,
};
use pretty_assertions::assert_eq;
use support::{ScriptedProvider, config, providers, request};

fn dispatcher(config: DispatchConfig, list: &[&Arc<ScriptedProvider>]) -> Dispatcher {
    Dispatcher::new(config, providers(list)).expect("valid dispatcher")
}

#[tokio::test(start_paused = true)]
async fn test_sends_with_primary_provider_first_try() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let secondary = ScriptedProvider::succeeding("ProviderB");
    let dispatcher = dispatcher(config(), &[&primary, &secondary]);

    let outcome = dispatcher.submit(request("test-key-1")).await;

    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderA"));
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 0);

    let status = dispatcher.status("test-key-1").unwrap();
    assert_eq!(status.state, DeliveryState::Success);
    assert_eq!(status.provider.as_deref(), Some("ProviderA"));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_key_returns_recorded_status() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = dispatcher(config(), &[&primary]);

    let first = dispatcher.submit(request("k1")).await;
    assert!(first.is_success());
    let recorded = dispatcher.status("k1").unwrap();

    let second = dispatcher.submit(request("k1")).await;

    let Outcome::Duplicate { original_status } = second else {
        panic!("expected duplicate, got {second:?}");
    };
    assert_eq!(original_status.state, DeliveryState::Success);
    assert_eq!(original_status.provider.as_deref(), Some("ProviderA"));
    assert_eq!(original_status, recorded);
    assert_eq!(dispatcher.status("k1").unwrap(), recorded);
    assert_eq!(primary.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_of_failed_request_is_not_retried() {
    let primary = ScriptedProvider::failing("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            max_retries: 0,
            ..config()
        },
        &[&primary],
    );

    assert!(matches!(
        dispatcher.submit(request("k1")).await,
        Outcome::Failed { .. }
    ));

    let second = dispatcher.submit(request("k1")).await;
    assert!(matches!(
        second,
        Outcome::Duplicate { original_status } if original_status.state == DeliveryState::Failed
    ));
    assert_eq!(primary.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_duplicate_is_answered_from_ledger() {
    let primary = ScriptedProvider::slow("ProviderA", Duration::from_millis(100));
    let dispatcher = dispatcher(config(), &[&primary]);

    let (first, second) = tokio::join!(
        dispatcher.submit(request("k1")),
        dispatcher.submit(request("k1"))
    );

    assert!(first.is_success());
    assert!(matches!(
        second,
        Outcome::Duplicate { original_status } if original_status.state == DeliveryState::Processing
    ));
    assert_eq!(primary.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_request_is_queued_at_tail() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 1,
            ..config()
        },
        &[&primary],
    );

    assert!(dispatcher.submit(request("rate-key-1")).await.is_success());

    let outcome = dispatcher.submit(request("rate-key-2")).await;
    assert!(matches!(outcome, Outcome::RateLimited));

    let outcome = dispatcher.submit(request("rate-key-3")).await;
    assert!(matches!(outcome, Outcome::RateLimited));

    let queued: Vec<String> = dispatcher
        .queue()
        .keys()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(queued, ["rate-key-2", "rate-key-3"]);
    assert_eq!(
        dispatcher.status("rate-key-2").map(|status| status.state),
        Some(DeliveryState::Queued)
    );
    assert_eq!(primary.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_does_not_consume_rate_limit() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 2,
            ..config()
        },
        &[&primary],
    );

    assert!(dispatcher.submit(request("k1")).await.is_success());
    assert!(matches!(
        dispatcher.submit(request("k1")).await,
        Outcome::Duplicate { .. }
    ));
    assert!(dispatcher.submit(request("k2")).await.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_retries_with_backoff_then_succeeds() {
    let primary = ScriptedProvider::flaky("ProviderA", 1);
    let secondary = ScriptedProvider::succeeding("ProviderB");
    let dispatcher = dispatcher(config(), &[&primary, &secondary]);

    let outcome = dispatcher.submit(request("k1")).await;

    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderA"));
    assert_eq!(primary.call_count(), 2);
    assert_eq!(primary.gaps(), [Duration::from_millis(1_000)]);
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_after_primary_exhausts_retries() {
    let primary = ScriptedProvider::failing("ProviderA");
    let secondary = ScriptedProvider::succeeding("ProviderB");
    let dispatcher = dispatcher(config(), &[&primary, &secondary]);

    let outcome = dispatcher.submit(request("k1")).await;

    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderB"));
    assert_eq!(primary.call_count(), 4);
    assert_eq!(
        primary.gaps(),
        [
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
            Duration::from_millis(4_000)
        ]
    );
    assert_eq!(secondary.call_count(), 1);

    // No backoff after the final attempt: fallback is immediate
    let last_primary = primary.calls().last().map(|call| call.at).unwrap();
    let first_secondary = secondary.calls()[0].at;
    assert_eq!(first_secondary.duration_since(last_primary), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_fails_when_every_provider_fails() {
    let primary = ScriptedProvider::failing("ProviderA");
    let secondary = ScriptedProvider::failing("ProviderB");
    let dispatcher = dispatcher(config(), &[&primary, &secondary]);

    let outcome = dispatcher.submit(request("k1")).await;

    let Outcome::Failed { error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(primary.call_count(), 4);
    assert_eq!(secondary.call_count(), 4);
    assert_eq!(error.failures.len(), 2);
    assert!(matches!(
        &error.failures[1],
        ProviderFailure::Exhausted { provider, attempts: 4, last_error }
            if provider == "ProviderB" && last_error.to_string() == "ProviderB failed"
    ));

    let status = dispatcher.status("k1").unwrap();
    assert_eq!(status.state, DeliveryState::Failed);
    assert!(
        status
            .error
            .as_deref()
            .is_some_and(|error| error.starts_with("All providers are unavailable"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_falls_back_immediately() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let secondary = ScriptedProvider::succeeding("ProviderB");
    let dispatcher = dispatcher(
        DispatchConfig {
            circuit_breaker_failure_threshold: 3,
            ..config()
        },
        &[&primary, &secondary],
    );

    let breaker = dispatcher.breaker(0).unwrap();
    for _ in 0..3 {
        breaker.on_failure();
    }
    assert!(!breaker.allow());

    let started = tokio::time::Instant::now();
    let outcome = dispatcher.submit(request("k1")).await;

    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderB"));
    assert_eq!(primary.call_count(), 0);
    assert_eq!(secondary.call_count(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_all_circuits_open_fails_without_attempts() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            circuit_breaker_failure_threshold: 1,
            ..config()
        },
        &[&primary],
    );
    dispatcher.breaker(0).unwrap().on_failure();

    let outcome = dispatcher.submit(request("k1")).await;

    assert!(matches!(
        outcome,
        Outcome::Failed { error }
            if error.failures == [ProviderFailure::CircuitOpen { provider: "ProviderA".to_string() }]
    ));
    assert_eq!(primary.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_probes_and_recovers() {
    // Two failing attempts trip the primary, the secondary takes over
    let primary = ScriptedProvider::flaky("ProviderA", 4);
    let secondary = ScriptedProvider::succeeding("ProviderB");
    let dispatcher = dispatcher(
        DispatchConfig {
            circuit_breaker_failure_threshold: 2,
            circuit_breaker_reset_timeout_ms: 10_000,
            max_retries: 1,
            ..config()
        },
        &[&primary, &secondary],
    );

    let outcome = dispatcher.submit(request("k1")).await;
    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderB"));
    assert_eq!(primary.call_count(), 2);
    assert_eq!(
        dispatcher.circuit_states(),
        [
            ("ProviderA".to_string(), CircuitState::Open),
            ("ProviderB".to_string(), CircuitState::Closed)
        ]
    );

    // While open the primary is skipped outright
    assert!(dispatcher.submit(request("k2")).await.is_success());
    assert_eq!(primary.call_count(), 2);

    // Half-open probe fails once: re-opened without reaching the threshold.
    // The retry still runs and fails, without re-arming the reset deadline.
    tokio::time::advance(Duration::from_millis(10_000)).await;
    assert_eq!(dispatcher.breaker(0).unwrap().state(), CircuitState::HalfOpen);
    let outcome = dispatcher.submit(request("k3")).await;
    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderB"));
    assert_eq!(primary.call_count(), 4);
    assert_eq!(dispatcher.breaker(0).unwrap().state(), CircuitState::Open);

    // The next probe succeeds and fully resets the breaker
    tokio::time::advance(Duration::from_millis(10_000)).await;
    let outcome = dispatcher.submit(request("k4")).await;
    assert!(matches!(&outcome, Outcome::Success { provider } if provider == "ProviderA"));
    assert_eq!(primary.call_count(), 5);

    let stats = dispatcher.breaker(0).unwrap().stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_respects_rate_limit_and_order() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 2,
            rate_limit_interval_ms: 1_000,
            ..config()
        },
        &[&primary],
    );

    for key in ["k0", "k1"] {
        assert!(dispatcher.submit(request(key)).await.is_success());
    }
    for key in ["q0", "q1", "q2", "q3", "q4"] {
        assert!(matches!(
            dispatcher.submit(request(key)).await,
            Outcome::RateLimited
        ));
    }
    assert_eq!(dispatcher.queue().len(), 5);

    // Window still full: nothing leaves the queue
    let report = dispatcher.drain_queue().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.remaining, 5);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    let report = dispatcher.drain_queue().await;
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.remaining, 3);
    assert_eq!(
        dispatcher.status("q1").map(|status| status.state),
        Some(DeliveryState::Success)
    );
    assert_eq!(
        dispatcher.status("q2").map(|status| status.state),
        Some(DeliveryState::Queued)
    );

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(dispatcher.drain_queue().await.remaining, 1);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    let report = dispatcher.drain_queue().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.remaining, 0);

    assert_eq!(primary.keys(), ["k0", "k1", "q0", "q1", "q2", "q3", "q4"]);
}

#[tokio::test(start_paused = true)]
async fn test_drained_request_falls_back_and_records_failure() {
    let primary = ScriptedProvider::failing("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 1,
            rate_limit_interval_ms: 5_000,
            max_retries: 1,
            ..config()
        },
        &[&primary],
    );

    assert!(matches!(
        dispatcher.submit(request("k0")).await,
        Outcome::Failed { .. }
    ));
    assert!(matches!(
        dispatcher.submit(request("k1")).await,
        Outcome::RateLimited
    ));

    tokio::time::advance(Duration::from_millis(5_000)).await;
    let report = dispatcher.drain_queue().await;

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(
        dispatcher.status("k1").map(|status| status.state),
        Some(DeliveryState::Failed)
    );
    assert_eq!(primary.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_drains_dequeue_each_request_once() {
    let primary = ScriptedProvider::slow("ProviderA", Duration::from_millis(100));
    let dispatcher = dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 1,
            ..config()
        },
        &[&primary],
    );

    assert!(dispatcher.submit(request("k0")).await.is_success());
    assert!(matches!(
        dispatcher.submit(request("k1")).await,
        Outcome::RateLimited
    ));
    tokio::time::advance(Duration::from_millis(1_000)).await;

    let (first, second) = tokio::join!(dispatcher.drain_queue(), dispatcher.drain_queue());

    assert_eq!(first.dispatched, 1);
    assert_eq!(first.succeeded, 1);
    assert_eq!(second.dispatched, 0);
    assert!(!second.skipped);
    assert_eq!(primary.keys(), ["k0", "k1"]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_of_queued_request_stays_queued_once() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 1,
            ..config()
        },
        &[&primary],
    );

    assert!(dispatcher.submit(request("k0")).await.is_success());
    assert!(matches!(
        dispatcher.submit(request("k1")).await,
        Outcome::RateLimited
    ));

    let second = dispatcher.submit(request("k1")).await;
    assert!(matches!(
        second,
        Outcome::Duplicate { original_status } if original_status.state == DeliveryState::Queued
    ));

    let queued: Vec<String> = dispatcher
        .queue()
        .keys()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(queued, ["k1"]);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(dispatcher.drain_queue().await.dispatched, 1);
    assert_eq!(primary.keys(), ["k0", "k1"]);
}

#[tokio::test(start_paused = true)]
async fn test_serve_keeps_draining_while_earlier_sends_are_in_flight() {
    let primary = ScriptedProvider::slow("ProviderA", Duration::from_secs(10));
    let dispatcher = Arc::new(dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 1,
            rate_limit_interval_ms: 1_000,
            queue_process_interval_ms: 500,
            ..config()
        },
        &[&primary],
    ));
    let started = tokio::time::Instant::now();

    let (shutdown, receiver) = tokio::sync::broadcast::channel(4);
    let serve = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.serve(receiver).await }
    });
    let first = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.submit(request("k0")).await }
    });

    // Let k0 take the only slot in the window
    tokio::task::yield_now().await;
    assert_eq!(primary.call_count(), 1);

    for key in ["q1", "q2"] {
        assert!(matches!(
            dispatcher.submit(request(key)).await,
            Outcome::RateLimited
        ));
    }

    // q1 leaves at 1000ms, q2 at 2000ms, both while k0 and q1 are still sending
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(dispatcher.queue().is_empty());
    for key in ["q1", "q2"] {
        assert_eq!(
            dispatcher.status(key).map(|status| status.state),
            Some(DeliveryState::Processing)
        );
    }
    let offsets: Vec<Duration> = primary
        .calls()
        .iter()
        .map(|call| call.at.duration_since(started))
        .collect();
    assert_eq!(
        offsets,
        [
            Duration::ZERO,
            Duration::from_millis(1_000),
            Duration::from_millis(2_000)
        ]
    );

    // Shutdown waits for the sends already started
    shutdown.send(Signal::Shutdown).unwrap();
    serve.await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(12_000));
    for key in ["q1", "q2"] {
        assert_eq!(
            dispatcher.status(key).map(|status| status.state),
            Some(DeliveryState::Success)
        );
    }
    assert!(first.await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_serve_drains_periodically_until_shutdown() {
    let primary = ScriptedProvider::succeeding("ProviderA");
    let dispatcher = Arc::new(dispatcher(
        DispatchConfig {
            rate_limit_max_requests: 1,
            rate_limit_interval_ms: 1_000,
            queue_process_interval_ms: 500,
            ..config()
        },
        &[&primary],
    ));

    let (shutdown, receiver) = tokio::sync::broadcast::channel(4);
    let serve = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.serve(receiver).await }
    });

    assert!(dispatcher.submit(request("k0")).await.is_success());
    assert!(matches!(
        dispatcher.submit(request("k1")).await,
        Outcome::RateLimited
    ));

    // The 500ms tick finds the window full; the 1000ms tick drains
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(
        dispatcher.status("k1").map(|status| status.state),
        Some(DeliveryState::Queued)
    );

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        dispatcher.status("k1").map(|status| status.state),
        Some(DeliveryState::Success)
    );
    assert!(dispatcher.queue().is_empty());

    shutdown.send(Signal::Shutdown).unwrap();
    serve.await.unwrap();
}

#[test]
fn test_rejects_invalid_construction() {
    let primary = ScriptedProvider::succeeding("ProviderA");

    assert!(matches!(
        Dispatcher::new(config(), Vec::new()),
        Err(ConfigError::NoProviders)
    ));
    assert!(matches!(
        Dispatcher::new(
            DispatchConfig {
                circuit_breaker_failure_threshold: 0,
                ..config()
            },
            providers(&[&primary])
        ),
        Err(ConfigError::Zero {
            field: "circuit_breaker_failure_threshold"
        })
    ));
}
