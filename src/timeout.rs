//! Races a user operation against a deadline, propagating cancellation in
//! both directions.

use crate::error::ResilienceError;
use crate::token::CancellationToken;
use std::fmt::Debug;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Defensive upper bound on any configured timeout: 30 days.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutConfigError {
    ZeroDuration,
    ExceedsMaximum { requested: Duration, limit: Duration },
}

impl std::fmt::Display for TimeoutConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroDuration => write!(f, "timeout duration must be non-zero"),
            Self::ExceedsMaximum { requested, limit } => {
                write!(f, "timeout {requested:?} exceeds maximum of {limit:?}")
            }
        }
    }
}
impl std::error::Error for TimeoutConfigError {}

#[derive(Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
    on_timeout: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("duration", &self.duration)
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Result<Self, TimeoutConfigError> {
        Self::new_with_max(duration, MAX_TIMEOUT)
    }

    pub fn new_with_max(duration: Duration, max: Duration) -> Result<Self, TimeoutConfigError> {
        if duration.is_zero() {
            return Err(TimeoutConfigError::ZeroDuration);
        }
        if duration > max {
            return Err(TimeoutConfigError::ExceedsMaximum {
                requested: duration,
                limit: max,
            });
        }
        Ok(Self {
            duration,
            on_timeout: None,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Registers a callback fired (errors swallowed, but logged) whenever
    /// the deadline wins the race against the operation.
    pub fn with_on_timeout(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    /// Runs `operation`, racing it against the configured deadline.
    /// `operation` receives a token that is a child of `token`, additionally
    /// cancelled when the deadline fires, so downstream primitives observe
    /// the timeout as ordinary cooperative cancellation.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        mut operation: Op,
        token: CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        if token.is_cancelled() {
            return Err(ResilienceError::cancelled(token.reason()));
        }
        tracing::debug!(duration = ?self.duration, "timeout admission granted");
        let inner_token = token.child_token();
        let started = Instant::now();
        tokio::select! {
            biased;
            result = operation(inner_token.clone()) => result,
            _ = tokio::time::sleep(self.duration) => {
                inner_token.cancel(Some("timeout".to_string()));
                tracing::warn!(elapsed = ?started.elapsed(), timeout = ?self.duration, "operation timed out");
                if let Some(cb) = &self.on_timeout {
                    if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
                        tracing::error!("timeout on_timeout callback panicked");
                    }
                }
                Err(ResilienceError::Timeout {
                    elapsed: started.elapsed(),
                    timeout: self.duration,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError;

    #[test]
    fn zero_duration_is_rejected() {
        assert_eq!(
            TimeoutPolicy::new(Duration::ZERO).unwrap_err(),
            TimeoutConfigError::ZeroDuration
        );
    }

    #[test]
    fn exceeding_max_is_rejected() {
        let err = TimeoutPolicy::new(MAX_TIMEOUT + Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TimeoutConfigError::ExceedsMaximum { .. }));
    }

    #[test]
    fn custom_max_is_honoured() {
        let result = TimeoutPolicy::new_with_max(Duration::from_secs(5), Duration::from_secs(1));
        assert!(result.is_err());
        let result = TimeoutPolicy::new_with_max(Duration::from_millis(500), Duration::from_secs(1));
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operation_completes_before_deadline() {
        let policy = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();
        let result: Result<_, ResilienceError<TestError>> = policy
            .execute(
                |_token| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(42)
                },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100)).unwrap();
        let result: Result<i32, ResilienceError<TestError>> = policy
            .execute(
                |_token| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(1)
                },
                CancellationToken::new(),
            )
            .await;
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_operation_observes_cancellation() {
        let policy = TimeoutPolicy::new(Duration::from_millis(50)).unwrap();
        let observed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed2 = observed.clone();
        let result: Result<i32, ResilienceError<TestError>> = policy
            .execute(
                move |token| {
                    let observed = observed2.clone();
                    async move {
                        token.cancelled().await;
                        observed.store(true, std::sync::atomic::Ordering::SeqCst);
                        std::future::pending::<()>().await;
                        unreachable!()
                    }
                },
                CancellationToken::new(),
            )
            .await;
        assert!(result.unwrap_err().is_timeout());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel(None);
        let policy = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();
        let result: Result<i32, ResilienceError<TestError>> =
            policy.execute(|_token| async { Ok(1) }, token).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn on_timeout_hook_fires_on_deadline() {
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        let policy = TimeoutPolicy::new(Duration::from_millis(50))
            .unwrap()
            .with_on_timeout(move || fired2.store(true, std::sync::atomic::Ordering::SeqCst));
        let result: Result<i32, ResilienceError<TestError>> = policy
            .execute(
                |_token| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(1)
                },
                CancellationToken::new(),
            )
            .await;
        assert!(result.unwrap_err().is_timeout());
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn on_timeout_hook_is_not_fired_on_success() {
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        let policy = TimeoutPolicy::new(Duration::from_secs(1))
            .unwrap()
            .with_on_timeout(move || fired2.store(true, std::sync::atomic::Ordering::SeqCst));
        let result: Result<i32, ResilienceError<TestError>> = policy
            .execute(|_token| async { Ok(1) }, CancellationToken::new())
            .await;
        assert_eq!(result, Ok(1));
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
