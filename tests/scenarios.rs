//! End-to-end scenarios exercising each primitive through its public API,
//! styled after a single integration test per behaviour rather than one
//! exhaustive matrix.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wardline::bulkhead::{BulkheadConfig, BulkheadPolicy};
use wardline::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
use wardline::error::ResilienceError;
use wardline::fallback::FallbackPolicy;
use wardline::rate_limit::store::InMemoryRateLimitStorage;
use wardline::rate_limit::RateLimiter;
use wardline::retry::RetryPolicy;
use wardline::timeout::TimeoutPolicy;
use wardline::token::CancellationToken;
use wardline::token_bucket::TokenBucketConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for TestError {}

#[tokio::test]
async fn retry_retries_inner_errors_then_succeeds() {
    let policy = RetryPolicy::<TestError>::builder().max_attempts(3).unwrap().build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let result = policy
        .execute(
            move |_t| {
                let n = calls2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ResilienceError::Inner(TestError("flaky")))
                    } else {
                        Ok(100)
                    }
                }
            },
            CancellationToken::new(),
        )
        .await;
    assert_eq!(result, Ok(100));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn bulkhead_rejects_when_full() {
    let bulkhead = BulkheadPolicy::new(BulkheadConfig::new(1).unwrap());
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let bh = bulkhead.clone();
    let b = barrier.clone();
    let holder = tokio::spawn(async move {
        bh.execute(
            move |_t| {
                let b = b.clone();
                async move {
                    b.wait().await;
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok::<_, ResilienceError<TestError>>(())
                }
            },
            CancellationToken::new(),
        )
        .await
    });
    barrier.wait().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let rejected: Result<(), _> = bulkhead.execute(|_t| async { Ok(()) }, CancellationToken::new()).await;
    assert!(matches!(rejected, Err(e) if e.is_bulkhead_full()));
    holder.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_triggers_on_slow_operation() {
    let policy = TimeoutPolicy::new(Duration::from_millis(50)).unwrap();
    let result: Result<(), ResilienceError<TestError>> = policy
        .execute(
            |_t| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(e) if e.is_timeout()));
}

#[tokio::test]
async fn circuit_breaker_opens_after_failure_threshold() {
    let policy = CircuitBreakerPolicy::new(CircuitBreakerConfig::new(2, Duration::from_secs(60)).unwrap());
    for _ in 0..2 {
        let _: Result<(), ResilienceError<TestError>> = policy
            .execute(|_t| async { Err(ResilienceError::Inner(TestError("down"))) }, CancellationToken::new())
            .await;
    }
    assert_eq!(policy.state(), CircuitState::Open);
    let result: Result<(), ResilienceError<TestError>> =
        policy.execute(|_t| async { Ok(()) }, CancellationToken::new()).await;
    assert!(matches!(result, Err(e) if e.is_circuit_open()));
}

#[tokio::test]
async fn rate_limiter_denies_once_burst_is_exhausted() {
    let limiter = RateLimiter::new(InMemoryRateLimitStorage::new(), TokenBucketConfig::new(5.0, 5.0, 1000));
    for _ in 0..5 {
        assert!(limiter.allow::<TestError>("client").await.unwrap());
    }
    assert!(!limiter.allow::<TestError>("client").await.unwrap());
}

#[tokio::test]
async fn fallback_recovers_from_primary_failure() {
    let policy = FallbackPolicy::<TestError>::new();
    let result = policy
        .execute(
            |_t| async { Err(ResilienceError::Inner(TestError("primary down"))) },
            |_t, _e| async { Ok("fallback value") },
            CancellationToken::new(),
        )
        .await;
    assert_eq!(result, Ok("fallback value"));
}

#[tokio::test]
async fn cancellation_short_circuits_every_primitive_without_side_effects() {
    let token = CancellationToken::new();
    token.cancel(Some("shutdown".to_string()));

    let retry = RetryPolicy::<TestError>::builder().build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let result: Result<(), ResilienceError<TestError>> = retry
        .execute(
            move |_t| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            token,
        )
        .await;
    assert!(matches!(result, Err(e) if e.is_cancelled()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_chain_succeeds_once_transient_failures_clear() {
    let circuit_breaker = CircuitBreakerPolicy::new(CircuitBreakerConfig::new(10, Duration::from_secs(60)).unwrap());
    let bulkhead = BulkheadPolicy::new(BulkheadConfig::new(4).unwrap());
    let timeout = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();
    let retry = RetryPolicy::<TestError>::builder().max_attempts(3).unwrap().build().unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();

    let result: Result<&'static str, ResilienceError<TestError>> = retry
        .execute(
            move |token| {
                let circuit_breaker = circuit_breaker.clone();
                let bulkhead = bulkhead.clone();
                let timeout = timeout.clone();
                let attempts = attempts2.clone();
                async move {
                    circuit_breaker
                        .execute(
                            move |token| {
                                let bulkhead = bulkhead.clone();
                                let timeout = timeout.clone();
                                let attempts = attempts.clone();
                                async move {
                                    bulkhead
                                        .execute(
                                            move |token| {
                                                let timeout = timeout.clone();
                                                let attempts = attempts.clone();
                                                async move {
                                                    timeout
                                                        .execute(
                                                            move |_token| {
                                                                let n = attempts.fetch_add(1, Ordering::SeqCst);
                                                                async move {
                                                                    if n == 0 {
                                                                        Err(ResilienceError::Inner(TestError("first try fails")))
                                                                    } else {
                                                                        Ok("success")
                                                                    }
                                                                }
                                                            },
                                                            token,
                                                        )
                                                        .await
                                                }
                                            },
                                            token,
                                        )
                                        .await
                                }
                            },
                            token,
                        )
                        .await
                }
            },
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result, Ok("success"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
