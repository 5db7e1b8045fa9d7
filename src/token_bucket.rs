//! The lazy-refill token bucket at the heart of the rate limiter.
//!
//! Kept deliberately free of storage/keying concerns (see
//! [`crate::rate_limit`]) so it can be unit tested as a pure state machine.

use crate::clock::Clock;
use std::sync::Arc;
use std::time::Duration;

/// One hour, in milliseconds: the refill calculation's defensive cap against
/// clock jumps or a process that was suspended for a long time.
const MAX_ELAPSED_MS: u64 = 60 * 60 * 1000;
const WAIT_TIME_CAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for a single bucket: refill `rate` tokens every
/// `interval_ms`, capped at `burst` tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub rate: f64,
    pub burst: f64,
    pub interval_ms: u64,
}

impl TokenBucketConfig {
    pub fn new(rate: f64, burst: f64, interval_ms: u64) -> Self {
        Self {
            rate,
            burst,
            interval_ms,
        }
    }
}

/// A single bucket's mutable state: current token count and the last time it
/// was refilled, expressed in the injected [`Clock`]'s millisecond units.
#[derive(Debug, Clone, Copy)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_at: u64,
}

impl BucketState {
    pub fn full(config: &TokenBucketConfig, now: u64) -> Self {
        Self {
            tokens: config.burst,
            last_refill_at: now,
        }
    }

    /// Advances `self` to `now`, adding tokens accrued since
    /// `last_refill_at`, clamped to `[0, burst]` and defended against clock
    /// regressions or long stalls.
    pub fn refill(&mut self, config: &TokenBucketConfig, now: u64) {
        if config.interval_ms == 0 || config.rate <= 0.0 {
            return;
        }
        let elapsed_ms = now.saturating_sub(self.last_refill_at).min(MAX_ELAPSED_MS);
        let accrued = (elapsed_ms as f64 / config.interval_ms as f64) * config.rate;
        self.tokens = (self.tokens + accrued).min(config.burst).max(0.0);
        self.last_refill_at = now;
    }

    /// Consumes `n` tokens if available. Returns whether the withdrawal
    /// succeeded.
    pub fn try_take(&mut self, n: f64) -> bool {
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time until at least one token will be available, given the current
    /// (already-refilled) state.
    pub fn wait_time(&self, config: &TokenBucketConfig) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if config.rate <= 0.0 || config.interval_ms == 0 {
            return WAIT_TIME_CAP;
        }
        let missing = 1.0 - self.tokens;
        let ms = missing * config.interval_ms as f64 / config.rate;
        if !ms.is_finite() || ms < 0.0 {
            return WAIT_TIME_CAP;
        }
        Duration::from_millis(ms as u64).min(WAIT_TIME_CAP)
    }
}

/// A single, non-keyed token bucket with its own clock reference. The keyed,
/// multi-tenant version lives in [`crate::rate_limit`].
#[derive(Clone)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Arc<std::sync::Mutex<BucketState>>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            config,
            state: Arc::new(std::sync::Mutex::new(BucketState::full(&config, now))),
            clock,
        }
    }

    pub fn allow(&self) -> bool {
        self.take(1.0)
    }

    pub fn take(&self, n: f64) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();
        state.refill(&self.config, now);
        state.try_take(n)
    }

    pub fn wait_time(&self) -> Duration {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();
        state.refill(&self.config, now);
        state.wait_time(&self.config)
    }

    pub fn tokens(&self) -> f64 {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();
        state.refill(&self.config, now);
        state.tokens
    }
}
