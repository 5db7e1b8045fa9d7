//! The retry attempt loop: backoff, jitter, retryability predicates and
//! cooperative cancellation.

use crate::backoff::Backoff;
use crate::error::{push_bounded, ResilienceError};
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::token::CancellationToken;
use std::fmt::Debug;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMaxAttempts(n) => write!(f, "max_attempts must be >= 1, got {n}"),
        }
    }
}
impl std::error::Error for BuildError {}

/// A retry policy over operation error type `E`.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    on_retry: Option<Arc<dyn Fn(usize, &E) + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        RetryPolicyBuilder::new().build().expect("default retry policy is always valid")
    }
}

impl<E> RetryPolicy<E> {
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Runs `operation` up to `max_attempts` times, applying backoff and
    /// jitter between attempts. `operation` receives a fresh clone of
    /// `token` on every call so it can observe cancellation.
    pub async fn execute<T, Fut, Op>(
        &self,
        mut operation: Op,
        token: CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let mut failures: Vec<E> = Vec::new();
        for attempt in 1..=self.max_attempts {
            if token.is_cancelled() {
                return Err(ResilienceError::cancelled(token.reason()));
            }
            tracing::debug!(attempt, max_attempts = self.max_attempts, "retry admission check");
            match operation(token.child_token()).await {
                Ok(value) => return Ok(value),
                Err(ResilienceError::Inner(err)) => {
                    let retryable = (self.should_retry)(&err);
                    let is_last = attempt == self.max_attempts;
                    if !retryable || is_last {
                        push_bounded(&mut failures, err);
                        tracing::warn!(attempts = attempt, "retry exhausted");
                        return Err(ResilienceError::MaxAttemptsReached {
                            attempts: attempt,
                            failures,
                        });
                    }
                    if let Some(cb) = &self.on_retry {
                        if catch_unwind(AssertUnwindSafe(|| cb(attempt, &err))).is_err() {
                            tracing::error!(attempt, "retry on_retry callback panicked");
                        }
                    }
                    push_bounded(&mut failures, err);
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = token.cancelled() => {
                            return Err(ResilienceError::cancelled(token.reason()));
                        }
                    }
                }
                // Admission/timeout/cancellation errors from an inner
                // primitive are not retried; they propagate straight
                // through.
                Err(other) => return Err(other),
            }
        }
        unreachable!("loop always returns by the final attempt")
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    on_retry: Option<Arc<dyn Fn(usize, &E) + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(std::time::Duration::from_millis(100)),
            jitter: Jitter::None,
            should_retry: Arc::new(|_| true),
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl<E> RetryPolicyBuilder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: usize) -> Result<Self, BuildError> {
        if n == 0 {
            return Err(BuildError::InvalidMaxAttempts(n));
        }
        self.max_attempts = n;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Arc::new(pred);
        self
    }

    pub fn on_retry(mut self, cb: impl Fn(usize, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(cb));
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
        })
    }
}
