//! Concurrency gate with an optional bounded wait queue, built on
//! [`crate::semaphore::Semaphore`].

use crate::error::ResilienceError;
use crate::semaphore::{AcquireError, Semaphore};
use crate::token::CancellationToken;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadConfigError {
    ZeroConcurrency,
}

impl std::fmt::Display for BulkheadConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "max_concurrent must be >= 1")
    }
}
impl std::error::Error for BulkheadConfigError {}

#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub queue_timeout: Option<Duration>,
}

impl BulkheadConfig {
    pub fn new(max_concurrent: usize) -> Result<Self, BulkheadConfigError> {
        if max_concurrent == 0 {
            return Err(BulkheadConfigError::ZeroConcurrency);
        }
        Ok(Self {
            max_concurrent,
            max_queue: 0,
            queue_timeout: None,
        })
    }

    pub fn with_queue(mut self, max_queue: usize, queue_timeout: Option<Duration>) -> Self {
        self.max_queue = max_queue;
        self.queue_timeout = queue_timeout;
        self
    }
}

#[derive(Clone)]
pub struct BulkheadPolicy {
    semaphore: Semaphore,
    max_concurrent: usize,
    max_queue: usize,
    queue_timeout: Option<Duration>,
    closed: Arc<AtomicBool>,
}

impl BulkheadPolicy {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.max_concurrent, config.max_queue.max(1)),
            max_concurrent: config.max_concurrent,
            max_queue: config.max_queue,
            queue_timeout: config.queue_timeout,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(BulkheadConfig::new(1_000_000_000).expect("nonzero literal"))
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    pub fn queue_depth(&self) -> usize {
        self.semaphore.queue_len()
    }

    pub async fn execute<T, E, Fut, Op>(
        &self,
        mut operation: Op,
        token: CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("bulkhead admission denied: closed");
            return Err(ResilienceError::BulkheadClosed);
        }
        if token.is_cancelled() {
            return Err(ResilienceError::cancelled(token.reason()));
        }

        let permit = if let Some(permit) = self.semaphore.try_acquire() {
            tracing::debug!(in_flight = self.in_flight(), max = self.max_concurrent, "bulkhead admission granted");
            permit
        } else {
            if self.max_queue == 0 || self.semaphore.queue_len() >= self.max_queue {
                tracing::warn!(in_flight = self.in_flight(), max = self.max_concurrent, "bulkhead admission denied: full");
                return Err(ResilienceError::BulkheadFull {
                    in_flight: self.in_flight(),
                    max: self.max_concurrent,
                });
            }
            tracing::debug!(queue_depth = self.queue_depth(), "bulkhead admission queued");
            let wait = self.semaphore.acquire(&token);
            let acquired = match self.queue_timeout {
                Some(timeout) => {
                    tokio::select! {
                        res = wait => res,
                        _ = tokio::time::sleep(timeout) => {
                            tracing::warn!(?timeout, "bulkhead queue wait timed out");
                            return Err(ResilienceError::Timeout {
                                elapsed: timeout,
                                timeout,
                            });
                        }
                    }
                }
                None => wait.await,
            };
            match acquired {
                Ok(permit) => {
                    tracing::debug!("bulkhead admission granted after queueing");
                    permit
                }
                Err(AcquireError::Rejected) => {
                    tracing::warn!("bulkhead admission denied: closed while queued");
                    return Err(ResilienceError::BulkheadClosed);
                }
                Err(AcquireError::Cancelled(_)) => {
                    return Err(ResilienceError::cancelled(token.reason()));
                }
            }
        };

        let result = operation(token.child_token()).await;
        drop(permit);
        result
    }

    /// Closes the bulkhead: new admissions are rejected immediately and all
    /// currently-queued waiters are rejected. Does not interrupt
    /// in-progress work; permits already held are released normally as
    /// their operations complete.
    pub fn close(&self) {
        tracing::info!("bulkhead closed");
        self.closed.store(true, Ordering::Release);
        self.semaphore.reject_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
