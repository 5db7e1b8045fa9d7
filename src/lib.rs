//! Composable async resilience primitives: circuit breaker, retry, token
//! bucket rate limiting, bulkhead, timeout, fallback, and a middleware chain
//! that strings them together — all driven by an explicit
//! [`CancellationToken`] rather than ambient/thread-local cancellation.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use wardline::{
//!     bulkhead::{BulkheadConfig, BulkheadPolicy},
//!     circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy},
//!     error::ResilienceError,
//!     retry::RetryPolicy,
//!     timeout::TimeoutPolicy,
//!     token::CancellationToken,
//! };
//!
//! #[derive(Debug, Clone)]
//! struct UpstreamError;
//!
//! # async fn run() -> Result<&'static str, ResilienceError<UpstreamError>> {
//! let circuit_breaker = CircuitBreakerPolicy::new(
//!     CircuitBreakerConfig::new(5, Duration::from_secs(30)).unwrap(),
//! );
//! let bulkhead = BulkheadPolicy::new(BulkheadConfig::new(10).unwrap());
//! let timeout = TimeoutPolicy::new(Duration::from_secs(5)).unwrap();
//! let retry = RetryPolicy::<UpstreamError>::builder().build().unwrap();
//!
//! // Retry wraps circuit breaker wraps bulkhead wraps timeout wraps the
//! // actual call, so a single slow/failing attempt is timed out, counted by
//! // the breaker, and retried as a whole.
//! retry
//!     .execute(
//!         move |token| {
//!             let circuit_breaker = circuit_breaker.clone();
//!             let bulkhead = bulkhead.clone();
//!             let timeout = timeout.clone();
//!             async move {
//!                 circuit_breaker
//!                     .execute(
//!                         move |token| {
//!                             let bulkhead = bulkhead.clone();
//!                             let timeout = timeout.clone();
//!                             async move {
//!                                 bulkhead
//!                                     .execute(
//!                                         move |token| {
//!                                             let timeout = timeout.clone();
//!                                             async move { timeout.execute(|_token| async { Ok("hello") }, token).await }
//!                                         },
//!                                         token,
//!                                     )
//!                                     .await
//!                             }
//!                         },
//!                         token,
//!                     )
//!                     .await
//!             }
//!         },
//!         CancellationToken::new(),
//!     )
//!     .await
//! # }
//! ```
//!
//! For an arbitrary, dynamically-assembled ordering of primitives, see
//! [`chain::MiddlewareChain`] instead of nesting `execute` calls by hand.
#![forbid(unsafe_code)]

pub mod backoff;
pub mod bulkhead;
pub mod chain;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod fallback;
pub mod jitter;
pub mod rate_limit;
pub mod retry;
pub mod ring_buffer;
pub mod semaphore;
pub mod sleeper;
pub mod telemetry;
pub mod timeout;
pub mod token;
pub mod token_bucket;

pub mod prelude;

pub use error::ResilienceError;
