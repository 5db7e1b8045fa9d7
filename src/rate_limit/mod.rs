//! Keyed rate limiting over pluggable storage.

pub mod store;

use crate::clock::{Clock, MonotonicClock};
use crate::error::ResilienceError;
use crate::token::CancellationToken;
use crate::token_bucket::TokenBucketConfig;
use store::{CasResult, RateLimitStorage, StoredBucket};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Maximum length, in bytes, a sanitised rate-limit key may have.
pub const MAX_KEY_LENGTH: usize = 256;
const MAX_CAS_RETRIES: usize = 3;

/// What to do when the storage backend itself is unavailable or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageFailureMode {
    /// Admit the request as though the limiter were absent.
    FailOpen,
    /// Deny the request.
    #[default]
    FailClosed,
    /// Fall back to the last bucket state this process observed for the
    /// key, if any; otherwise behave like `FailClosed`.
    LastKnown,
}

/// Optional hooks observing every rate-limit decision.
pub trait RateLimitMetrics: Send + Sync + Debug {
    fn on_allow(&self, _key: &str) {}
    fn on_deny(&self, _key: &str, _wait: Duration) {}
    fn on_error(&self, _key: &str) {}
    fn on_storage_latency(&self, _key: &str, _latency: Duration) {}
}

#[derive(Debug, Default)]
pub struct NoopRateLimitMetrics;
impl RateLimitMetrics for NoopRateLimitMetrics {}

fn sanitize_key(key: &str) -> Result<String, ResilienceError<std::convert::Infallible>> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(ResilienceError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LENGTH,
        });
    }
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_graphic() { c } else { '_' })
        .collect();
    Ok(sanitized)
}

/// A keyed rate limiter: one logical [`crate::token_bucket`] per key,
/// persisted through a [`RateLimitStorage`] backend via optimistic
/// compare-and-set.
pub struct RateLimiter<S> {
    storage: Arc<S>,
    config: TokenBucketConfig,
    failure_mode: StorageFailureMode,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn RateLimitMetrics>,
    last_known: Arc<std::sync::Mutex<std::collections::HashMap<String, StoredBucket>>>,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            config: self.config,
            failure_mode: self.failure_mode,
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            last_known: self.last_known.clone(),
        }
    }
}

impl<S> RateLimiter<S>
where
    S: RateLimitStorage,
{
    pub fn new(storage: S, config: TokenBucketConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            config,
            failure_mode: StorageFailureMode::default(),
            clock: Arc::new(MonotonicClock::new()),
            metrics: Arc::new(NoopRateLimitMetrics),
            last_known: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
        }
    }

    pub fn with_failure_mode(mut self, mode: StorageFailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn RateLimitMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attempts to consume `n` tokens for `key`, retrying a bounded number
    /// of times on optimistic-lock conflicts before falling back to the
    /// configured [`StorageFailureMode`].
    pub async fn take<E>(&self, key: &str, n: f64) -> Result<bool, ResilienceError<E>> {
        if n > self.config.burst {
            return Err(ResilienceError::TokensExceeded {
                requested: n,
                burst: self.config.burst,
            });
        }
        let key = sanitize_key(key).map_err(|e| match e {
            ResilienceError::KeyTooLong { len, max } => ResilienceError::KeyTooLong { len, max },
            _ => unreachable!(),
        })?;

        tracing::debug!(key = %key, requested = n, "rate limiter admission check");
        let mut last_wait = Duration::ZERO;
        for _ in 0..MAX_CAS_RETRIES {
            let started = std::time::Instant::now();
            let existing = match self.storage.get(&key).await {
                Ok(v) => v,
                Err(_) => return self.on_storage_error(&key),
            };
            self.metrics.on_storage_latency(&key, started.elapsed());

            let now = self.clock.now_millis();
            let mut state = existing.unwrap_or(StoredBucket {
                tokens: self.config.burst,
                last_refill_at: now,
            });

            let elapsed_ms = now.saturating_sub(state.last_refill_at).min(60 * 60 * 1000);
            if self.config.interval_ms > 0 && self.config.rate > 0.0 {
                let accrued = elapsed_ms as f64 / self.config.interval_ms as f64 * self.config.rate;
                state.tokens = (state.tokens + accrued).min(self.config.burst).max(0.0);
            }
            state.last_refill_at = now;
            last_wait = self.wait_time_for(state.tokens);

            if state.tokens < n {
                tracing::warn!(key = %key, wait = ?last_wait, "rate limiter denied request");
                self.metrics.on_deny(&key, last_wait);
                return Ok(false);
            }

            let new_state = StoredBucket {
                tokens: state.tokens - n,
                last_refill_at: now,
            };
            match self.storage.compare_and_set(&key, existing, new_state).await {
                Ok(CasResult::Committed) => {
                    self.last_known.lock().unwrap().insert(key.clone(), new_state);
                    self.metrics.on_allow(&key);
                    return Ok(true);
                }
                Ok(CasResult::Conflict) => continue,
                Err(_) => return self.on_storage_error(&key),
            }
        }
        // Contended past the retry budget: treat as a transient denial
        // rather than escalating to a storage failure.
        tracing::warn!(key = %key, "rate limiter denied request: CAS retries exhausted");
        self.metrics.on_deny(&key, last_wait);
        Ok(false)
    }

    pub async fn allow<E>(&self, key: &str) -> Result<bool, ResilienceError<E>> {
        self.take(key, 1.0).await
    }

    /// Waits until a token is available for `key`, honouring cancellation.
    pub async fn wait<E>(&self, key: &str, token: &CancellationToken) -> Result<(), ResilienceError<E>> {
        loop {
            if token.is_cancelled() {
                return Err(ResilienceError::cancelled(token.reason()));
            }
            if self.allow(key).await? {
                return Ok(());
            }
            let wait = self.wait_time(key).await?;
            tokio::select! {
                _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                _ = token.cancelled() => {
                    return Err(ResilienceError::cancelled(token.reason()));
                }
            }
        }
    }

    pub async fn wait_time<E>(&self, key: &str) -> Result<Duration, ResilienceError<E>> {
        let key = sanitize_key(key).map_err(|e| match e {
            ResilienceError::KeyTooLong { len, max } => ResilienceError::KeyTooLong { len, max },
            _ => unreachable!(),
        })?;
        let state = match self.storage.get(&key).await {
            Ok(v) => v,
            Err(_) => return Ok(self.fallback_wait()),
        };
        let now = self.clock.now_millis();
        let mut tokens = state.map(|s| s.tokens).unwrap_or(self.config.burst);
        if let Some(s) = state {
            let elapsed_ms = now.saturating_sub(s.last_refill_at).min(60 * 60 * 1000);
            if self.config.interval_ms > 0 && self.config.rate > 0.0 {
                let accrued = elapsed_ms as f64 / self.config.interval_ms as f64 * self.config.rate;
                tokens = (s.tokens + accrued).min(self.config.burst).max(0.0);
            }
        }
        Ok(self.wait_time_for(tokens))
    }

    fn wait_time_for(&self, tokens: f64) -> Duration {
        if tokens >= 1.0 || self.config.rate <= 0.0 || self.config.interval_ms == 0 {
            return Duration::ZERO;
        }
        let missing = 1.0 - tokens;
        let ms = missing * self.config.interval_ms as f64 / self.config.rate;
        Duration::from_millis(ms.max(0.0) as u64)
    }

    fn fallback_wait(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms.max(1))
    }

    fn on_storage_error<T, E>(&self, key: &str) -> Result<T, ResilienceError<E>>
    where
        T: From<bool>,
    {
        tracing::warn!(key = %key, failure_mode = ?self.failure_mode, "rate limit storage error");
        self.metrics.on_error(key);
        match self.failure_mode {
            StorageFailureMode::FailOpen => Ok(T::from(true)),
            StorageFailureMode::FailClosed => Ok(T::from(false)),
            StorageFailureMode::LastKnown => {
                let known = self.last_known.lock().unwrap().get(key).copied();
                Ok(T::from(known.map(|b| b.tokens >= 1.0).unwrap_or(false)))
            }
        }
    }
}
