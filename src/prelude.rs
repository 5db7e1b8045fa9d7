//! Convenient re-exports of the most commonly used types.

pub use crate::backoff::Backoff;
pub use crate::bulkhead::{BulkheadConfig, BulkheadConfigError, BulkheadPolicy};
pub use crate::chain::{BoxOp, MiddlewareChain};
pub use crate::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerConfigError, CircuitBreakerPolicy, CircuitState, Counts,
};
pub use crate::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::error::{Retryable, ResilienceError};
pub use crate::fallback::FallbackPolicy;
pub use crate::jitter::Jitter;
pub use crate::rate_limit::store::{InMemoryRateLimitStorage, RateLimitStorage};
pub use crate::rate_limit::{RateLimiter, StorageFailureMode};
pub use crate::retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use crate::sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use crate::telemetry::{Logger, Metrics, NoopLogger, NoopMetrics, NoopSpan, NoopTracer, Span, Tracer, TracingLogger};
pub use crate::timeout::{TimeoutConfigError, TimeoutPolicy, MAX_TIMEOUT};
pub use crate::token::CancellationToken;
pub use crate::token_bucket::{BucketState, TokenBucket, TokenBucketConfig};
