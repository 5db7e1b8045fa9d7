//! Wires every primitive into one chain around a flaky fake upstream call:
//! rate limiter -> circuit breaker -> bulkhead -> timeout -> retry ->
//! fallback -> operation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wardline::bulkhead::{BulkheadConfig, BulkheadPolicy};
use wardline::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy};
use wardline::error::ResilienceError;
use wardline::fallback::FallbackPolicy;
use wardline::rate_limit::store::InMemoryRateLimitStorage;
use wardline::rate_limit::RateLimiter;
use wardline::retry::RetryPolicy;
use wardline::timeout::TimeoutPolicy;
use wardline::token::CancellationToken;
use wardline::token_bucket::TokenBucketConfig;

#[derive(Debug, Clone)]
struct UpstreamError(&'static str);

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream: {}", self.0)
    }
}
impl std::error::Error for UpstreamError {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let rate_limiter = RateLimiter::new(
        InMemoryRateLimitStorage::new(),
        TokenBucketConfig::new(50.0, 50.0, 1000),
    );
    let circuit_breaker = CircuitBreakerPolicy::new(CircuitBreakerConfig::new(3, Duration::from_secs(10))?);
    let bulkhead = BulkheadPolicy::new(BulkheadConfig::new(8)?.with_queue(16, Some(Duration::from_millis(200))));
    let timeout = TimeoutPolicy::new(Duration::from_millis(200))?;
    let retry = RetryPolicy::<UpstreamError>::builder()
        .max_attempts(3)?
        .build()?;
    let fallback = FallbackPolicy::<UpstreamError>::new();

    let attempt_count = Arc::new(AtomicUsize::new(0));

    for i in 0..20 {
        let token = CancellationToken::new();
        let key = "demo-client";
        rate_limiter
            .wait::<UpstreamError>(key, &token)
            .await?;

        let circuit_breaker = circuit_breaker.clone();
        let bulkhead = bulkhead.clone();
        let timeout = timeout.clone();
        let retry = retry.clone();
        let fallback = fallback.clone();
        let attempt_count = attempt_count.clone();

        let result: Result<&'static str, ResilienceError<UpstreamError>> = fallback
            .execute(
                move |token| {
                    let circuit_breaker = circuit_breaker.clone();
                    let bulkhead = bulkhead.clone();
                    let timeout = timeout.clone();
                    let retry = retry.clone();
                    let attempt_count = attempt_count.clone();
                    async move {
                        circuit_breaker
                            .execute(
                                move |token| {
                                    let bulkhead = bulkhead.clone();
                                    let timeout = timeout.clone();
                                    let retry = retry.clone();
                                    let attempt_count = attempt_count.clone();
                                    async move {
                                        bulkhead
                                            .execute(
                                                move |token| {
                                                    let timeout = timeout.clone();
                                                    let retry = retry.clone();
                                                    let attempt_count = attempt_count.clone();
                                                    async move {
                                                        retry
                                                            .execute(
                                                                move |token| {
                                                                    let timeout = timeout.clone();
                                                                    let attempt_count = attempt_count.clone();
                                                                    async move {
                                                                        timeout
                                                                            .execute(
                                                                                move |_token| {
                                                                                    let n = attempt_count.fetch_add(1, Ordering::SeqCst);
                                                                                    async move {
                                                                                        if n % 5 == 0 {
                                                                                            Err(ResilienceError::Inner(UpstreamError("flaked")))
                                                                                        } else {
                                                                                            Ok("ok")
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
                                token,
                            )
                            .await
                    }
                },
                move |_token, _err| async { Ok("fallback-value") },
                token,
            )
            .await;

        println!("iteration {i}: {result:?}");
    }

    Ok(())
}
