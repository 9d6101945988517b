//! Integration tests for the request governor.
//!
//! Time is paused in every test, so delays are exact and runs are instant.

use listedit_core::{
    GovernorConfig, GovernorConfigUpdate, GovernorState, ListEditError, RateCapacity,
    RequestError, RequestGovernor, TransportKind,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

fn config(rate: f64, concurrency: usize) -> GovernorConfig {
    GovernorConfig::new()
        .with_max_requests_per_second(rate)
        .with_max_concurrent_requests(concurrency)
        .with_initial_retry_delay(Duration::from_millis(100))
        .with_backoff_multiplier(2.0)
        .with_max_retries(3)
}

/// Operation that fails with `error` for its first `failures` attempts.
fn flaky(
    failures: u32,
    error: RequestError,
) -> (
    Arc<AtomicU32>,
    impl FnMut() -> std::future::Ready<Result<u32, RequestError>> + Send + 'static,
) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        std::future::ready(if n <= failures {
            Err(error.clone())
        } else {
            Ok(n)
        })
    };
    (calls, op)
}

/// Operation that succeeds once `gate` has a permit to lend.
fn blocked(
    gate: &Arc<Semaphore>,
) -> impl FnMut() -> futures::future::BoxFuture<'static, Result<(), RequestError>> + Send + 'static
{
    let gate = gate.clone();
    move || {
        let gate = gate.clone();
        Box::pin(async move {
            gate.acquire()
                .await
                .map(|_| ())
                .map_err(|e| RequestError::message(e.to_string()))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_mixed_failure_scenario() {
    let config = GovernorConfig::new()
        .with_max_requests_per_second(1.0)
        .with_max_concurrent_requests(1)
        .with_max_retries(2)
        .with_initial_retry_delay(Duration::from_millis(100))
        .with_backoff_multiplier(2.0);
    let governor = RequestGovernor::new(config).unwrap();

    let (_, op1) = flaky(0, RequestError::http(429, "Too Many Requests"));
    let (_, op2) = flaky(2, RequestError::http(429, "Too Many Requests"));
    let (_, op3) = flaky(1, RequestError::http(500, "Internal Server Error"));

    let p1 = governor.enqueue(op1);
    let p2 = governor.enqueue(op2);
    let p3 = governor.enqueue(op3);

    assert_eq!(p1.await.unwrap(), 1);
    assert_eq!(p2.await.unwrap(), 3);
    assert_eq!(p3.await.unwrap(), 2);
    governor.wait_idle().await;

    let stats = governor.statistics();
    assert_eq!(stats.rate_limit_hits, 2);
    assert_eq!(stats.retried_requests, 3);
    assert_eq!(stats.total_requests, 6);
    assert_eq!(stats.successful_requests, 3);
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.current_queue_size, 0);
    assert_eq!(governor.state(), GovernorState::Idle);
}

/// Largest number of `instants` inside any window `(t - span, t]`.
fn max_in_window(instants: &[Instant], span: Duration) -> usize {
    instants
        .iter()
        .map(|&t| {
            instants
                .iter()
                .filter(|&&u| u <= t && t.duration_since(u) < span)
                .count()
        })
        .max()
        .unwrap_or(0)
}

fn run_rate_ceiling(n: usize, rate: f64, concurrency: usize, capacity: RateCapacity) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async move {
        let config = config(rate, concurrency).with_rate_capacity(capacity);
        let (window_capacity, span) = config.rate_window();
        let governor = RequestGovernor::new(config).unwrap();
        let dispatched = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let dispatched = dispatched.clone();
                governor.enqueue(move || {
                    dispatched.lock().unwrap().push(Instant::now());
                    async { Ok::<_, RequestError>(()) }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let instants = dispatched.lock().unwrap().clone();
        assert_eq!(instants.len(), n);
        assert!(max_in_window(&instants, span) <= window_capacity);
        // Never more than ceil(rate) in any one-second window.
        assert!(max_in_window(&instants, Duration::from_secs(1)) <= rate.ceil() as usize);
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_rate_ceiling_literal(n in 1usize..=200, rate in 0.1f64..10.0, concurrency in 1usize..4) {
        run_rate_ceiling(n, rate, concurrency, RateCapacity::Literal);
    }

    #[test]
    fn prop_rate_ceiling_scaled(n in 1usize..=200, rate in 0.1f64..10.0, concurrency in 1usize..4) {
        run_rate_ceiling(n, rate, concurrency, RateCapacity::Scaled);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fractional_rate_interpretations() {
    async fn dispatch_offsets(capacity: RateCapacity) -> Vec<Duration> {
        let governor =
            RequestGovernor::new(config(0.5, 1).with_rate_capacity(capacity)).unwrap();
        let start = Instant::now();
        let offsets = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let offsets = offsets.clone();
                governor.enqueue(move || {
                    offsets.lock().unwrap().push(start.elapsed());
                    async { Ok::<_, RequestError>(()) }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        let result = offsets.lock().unwrap().clone();
        result
    }

    // 0.5 req/s taken literally admits one request per second.
    assert_eq!(
        dispatch_offsets(RateCapacity::Literal).await,
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
    );
    // Scaled stays under the average: one request every two seconds.
    assert_eq!(
        dispatch_offsets(RateCapacity::Scaled).await,
        vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_burst_fills_window_then_waits() {
    let governor = RequestGovernor::new(config(2.5, 1)).unwrap();
    let start = Instant::now();
    let offsets = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let offsets = offsets.clone();
            governor.enqueue(move || {
                offsets.lock().unwrap().push(start.elapsed());
                async { Ok::<_, RequestError>(()) }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let second = Duration::from_secs(1);
    assert_eq!(
        *offsets.lock().unwrap(),
        vec![Duration::ZERO, Duration::ZERO, Duration::ZERO, second, second, second]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling() {
    let governor = RequestGovernor::new(config(1000.0, 3)).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..20u64)
        .map(|i| {
            let active = active.clone();
            let peak = peak.clone();
            governor.enqueue(move || {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + (i * 7) % 30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, RequestError>(())
                }
            })
        })
        .collect();

    assert_eq!(governor.active_requests(), 3);
    assert_eq!(governor.queued_requests(), 17);
    assert_eq!(governor.statistics().current_queue_size, 17);

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(governor.active_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_dispatch_order() {
    let governor = RequestGovernor::new(config(2.0, 3)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let order = order.clone();
            let mut first = true;
            governor.enqueue(move || {
                let first_attempt = std::mem::replace(&mut first, false);
                if first_attempt {
                    order.lock().unwrap().push(i);
                }
                // Some operations retry once; retries must not reorder first attempts.
                let fail = i % 4 == 0 && first_attempt;
                async move {
                    if fail {
                        Err(RequestError::http(503, "Service Unavailable"))
                    } else {
                        Ok(())
                    }
                }
            })
        })
        .collect();

    let ids: Vec<u64> = handles.iter().map(|h| h.id().get()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), (0..12).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let recorder = attempts.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let result = governor
        .enqueue(move || {
            recorder.lock().unwrap().push(Instant::now());
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RequestError::message("Rate limit exceeded, slow down"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
    assert_eq!(result.unwrap(), 2);

    let attempts = attempts.lock().unwrap().clone();
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, vec![Duration::from_millis(100), Duration::from_millis(200)]);

    let stats = governor.statistics();
    assert_eq!(stats.retried_requests, 2);
    assert_eq!(stats.rate_limit_hits, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_returns_last_error() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let err = governor
        .enqueue(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Err::<(), _>(RequestError::transport(
                    TransportKind::Timeout,
                    format!("attempt {} timed out", n),
                ))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        err.request_error(),
        Some(&RequestError::transport(TransportKind::Timeout, "attempt 4 timed out"))
    );

    let stats = governor.statistics();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.failed_requests, 4);
    assert_eq!(stats.retried_requests, 3);
    assert_eq!(stats.rate_limit_hits, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_not_retried() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let (calls, op) = flaky(u32::MAX, RequestError::http(400, "Bad Request"));

    let start = Instant::now();
    let err = governor.enqueue(op).await.unwrap_err();
    assert_eq!(err.request_error().and_then(|e| e.status()), Some(400));
    assert!(!err.is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);

    let stats = governor.statistics();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.retried_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_settles_once() {
    let governor = RequestGovernor::new(config(50.0, 2)).unwrap();
    let errors = [
        RequestError::http(429, "Too Many Requests"),
        RequestError::http(502, "Bad Gateway"),
        RequestError::http(401, "Unauthorized"),
        RequestError::transport(TransportKind::ConnectionReset, "connection reset by peer"),
    ];

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let (_, op) = flaky(i % 6, errors[i as usize % errors.len()].clone());
        handles.push(governor.enqueue(op));
    }
    for handle in handles {
        let _ = handle.await;
    }
    governor.wait_idle().await;

    let stats = governor.statistics();
    assert_eq!(stats.total_requests, stats.successful_requests + stats.failed_requests);
    assert_eq!(stats.in_flight_attempts(), 0);
    assert!(stats.retried_requests <= stats.failed_requests);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_queue_and_statistics() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let warmup = governor.enqueue(|| async { Ok::<_, RequestError>(()) });
    warmup.await.unwrap();
    assert_eq!(governor.statistics().total_requests, 1);

    let release = Arc::new(Semaphore::new(0));
    let running = governor.enqueue(blocked(&release));
    let queued: Vec<_> = (0..4)
        .map(|_| governor.enqueue(|| async { Ok::<_, RequestError>(()) }))
        .collect();
    tokio::task::yield_now().await;
    assert_eq!(governor.queued_requests(), 4);

    governor.reset();
    let stats = governor.statistics();
    assert!(stats.is_zero());
    assert_eq!(stats.current_queue_size, 0);
    assert_eq!(governor.state(), GovernorState::Idle);
    assert_eq!(governor.active_requests(), 0);

    for handle in queued {
        assert!(matches!(handle.await, Err(ListEditError::Cancelled)));
    }

    // The forgotten operation still settles its own handle but not the stats.
    release.add_permits(1);
    running.await.unwrap();
    assert!(governor.statistics().is_zero());

    let after = governor.enqueue(|| async { Ok::<_, RequestError>(5) });
    assert_eq!(after.await.unwrap(), 5);
    assert_eq!(governor.statistics().total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_drains_in_flight_work() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let token = governor.stop_token();
    let release = Arc::new(Semaphore::new(0));

    let running = governor.enqueue(blocked(&release));
    let queued: Vec<_> = (0..3)
        .map(|_| governor.enqueue(|| async { Ok::<_, RequestError>(()) }))
        .collect();
    assert_eq!(governor.state(), GovernorState::Running);

    governor.stop();
    assert!(token.is_cancelled());
    assert_eq!(governor.state(), GovernorState::Draining);
    assert_eq!(governor.queued_requests(), 0);
    for handle in queued {
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    // Nothing new starts while draining.
    let rejected = governor.enqueue(|| async { Ok::<_, RequestError>(()) });
    assert!(rejected.await.unwrap_err().is_cancelled());

    release.add_permits(1);
    running.await.unwrap();
    governor.wait_idle().await;
    assert_eq!(governor.state(), GovernorState::Idle);
    assert!(!governor.stop_token().is_cancelled());

    let stats = governor.statistics();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);

    let resumed = governor.enqueue(|| async { Ok::<_, RequestError>("again") });
    assert_eq!(resumed.await.unwrap(), "again");
}

#[tokio::test(start_paused = true)]
async fn test_stop_token_wakes_waiters() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let token = governor.stop_token();
    let waiter = tokio::spawn(async move { token.cancelled().await });

    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    governor.stop();
    waiter.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_committed_retries_finish() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let (calls, op) = flaky(2, RequestError::http(503, "Service Unavailable"));

    let pending = governor.enqueue(op);
    tokio::task::yield_now().await;
    governor.stop();

    assert_eq!(pending.await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    governor.wait_idle().await;
}

#[tokio::test(start_paused = true)]
async fn test_raising_concurrency_dispatches_queued_work() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let release = Arc::new(Semaphore::new(0));

    let handles: Vec<_> = (0..3).map(|_| governor.enqueue(blocked(&release))).collect();
    assert_eq!(governor.active_requests(), 1);
    assert_eq!(governor.queued_requests(), 2);

    let updated = governor
        .update_configuration(GovernorConfigUpdate {
            max_concurrent_requests: Some(3),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(updated.max_concurrent_requests, 3);
    assert_eq!(governor.configuration().max_concurrent_requests, 3);
    assert_eq!(governor.active_requests(), 3);
    assert_eq!(governor.queued_requests(), 0);

    release.add_permits(1);
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_update_spares_running_operation() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let recorder = attempts.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let pending = governor.enqueue(move || {
        recorder.lock().unwrap().push(Instant::now());
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(RequestError::http(429, "Too Many Requests"))
            } else {
                Ok(())
            }
        }
    });
    tokio::task::yield_now().await;

    governor
        .update_configuration(GovernorConfigUpdate {
            initial_retry_delay: Some(Duration::from_secs(10)),
            ..Default::default()
        })
        .unwrap();
    pending.await.unwrap();

    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts[1] - attempts[0], Duration::from_millis(100));
    assert_eq!(attempts[2] - attempts[1], Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_custom_classifier() {
    let classifier = |error: &RequestError| {
        if error.text().contains("slow down") {
            listedit_core::FailureClass::RateLimited
        } else {
            listedit_core::FailureClass::Fatal
        }
    };
    let governor =
        RequestGovernor::with_classifier(config(1000.0, 1), Arc::new(classifier)).unwrap();

    let (calls, op) = flaky(1, RequestError::message("please slow down"));
    assert_eq!(governor.enqueue(op).await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(governor.statistics().rate_limit_hits, 1);

    // The default would retry a 503; this classifier does not.
    let (calls, op) = flaky(1, RequestError::http(503, "Service Unavailable"));
    assert!(governor.enqueue(op).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_average_response_time() {
    let governor = RequestGovernor::new(config(1000.0, 1)).unwrap();
    for ms in [100u64, 300] {
        governor
            .enqueue(move || async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, RequestError>(())
            })
            .await
            .unwrap();
    }
    let stats = governor.statistics();
    assert!((stats.average_response_time - 200.0).abs() < 1e-6);
}

#[test]
fn test_runtime_shutdown_with_long_queue() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let (governor, handles) = runtime.block_on(async {
        let governor = RequestGovernor::new(config(1000.0, 4)).unwrap();
        let handles: Vec<_> = (0..5000)
            .map(|_| governor.enqueue(std::future::pending::<Result<(), RequestError>>))
            .collect();
        tokio::task::yield_now().await;
        assert_eq!(governor.active_requests(), 4);
        (governor, handles)
    });

    // Tearing down the in-flight tasks frees their slots without starting
    // anything else from the queue.
    drop(runtime);
    assert_eq!(governor.active_requests(), 0);
    assert_eq!(governor.queued_requests(), 4996);

    drop(governor);
    for handle in handles {
        let err = futures::executor::block_on(handle).unwrap_err();
        assert!(err.is_cancelled());
    }
}
