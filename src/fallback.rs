//! Secondary-operation wrapper: falls back to an alternate operation when
//! the primary fails, always re-raising the primary's error if the fallback
//! also fails.

use crate::error::ResilienceError;
use crate::token::CancellationToken;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Wraps a primary operation with a fallback, invoked on primary failure
/// (excluding cancellation, which always propagates untouched).
pub struct FallbackPolicy<E> {
    should_fallback: Option<Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>>,
    on_fallback: Option<Arc<dyn Fn(&ResilienceError<E>) + Send + Sync>>,
}

impl<E> Clone for FallbackPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            should_fallback: self.should_fallback.clone(),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<E> Default for FallbackPolicy<E> {
    fn default() -> Self {
        Self {
            should_fallback: None,
            on_fallback: None,
        }
    }
}

impl<E> FallbackPolicy<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts fallback to only the errors for which `pred` returns true;
    /// others propagate without ever invoking the fallback operation.
    pub fn should_fallback(mut self, pred: impl Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static) -> Self {
        self.should_fallback = Some(Arc::new(pred));
        self
    }

    pub fn on_fallback(mut self, cb: impl Fn(&ResilienceError<E>) + Send + Sync + 'static) -> Self {
        self.on_fallback = Some(Arc::new(cb));
        self
    }

    pub async fn execute<T, PrimaryFut, Primary, FallbackFut, Fb>(
        &self,
        mut primary: Primary,
        mut fallback: Fb,
        token: CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Primary: FnMut(CancellationToken) -> PrimaryFut,
        PrimaryFut: Future<Output = Result<T, ResilienceError<E>>>,
        Fb: FnMut(CancellationToken, &ResilienceError<E>) -> FallbackFut,
        FallbackFut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        if token.is_cancelled() {
            return Err(ResilienceError::cancelled(token.reason()));
        }
        match primary(token.child_token()).await {
            Ok(value) => Ok(value),
            Err(primary_err) => {
                if primary_err.is_cancelled() {
                    return Err(primary_err);
                }
                if let Some(pred) = &self.should_fallback {
                    if !pred(&primary_err) {
                        return Err(primary_err);
                    }
                }
                tracing::info!("fallback activated");
                if let Some(cb) = &self.on_fallback {
                    if catch_unwind(AssertUnwindSafe(|| cb(&primary_err))).is_err() {
                        tracing::error!("fallback on_fallback callback panicked");
                    }
                }
                match fallback(token.child_token(), &primary_err).await {
                    Ok(value) => Ok(value),
                    Err(_fallback_err) => Err(primary_err),
                }
            }
        }
    }
}
