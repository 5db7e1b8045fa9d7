//! A counting semaphore with FIFO waiter fairness and cancellation-aware
//! waiter removal, built on [`crate::ring_buffer::RingBuffer`] rather than
//! the runtime's own semaphore so that cancellation can surgically remove a
//! single waiter from the middle of the queue.

use crate::token::CancellationToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// What a queued waiter was woken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// A permit was hand-delivered to this waiter.
    Granted,
    /// The waiter was rejected outright (the semaphore's owner closed).
    Rejected,
}

struct Waiter {
    id: u64,
    sender: oneshot::Sender<Wake>,
}

struct State {
    permits: usize,
    waiters: crate::ring_buffer::RingBuffer<Waiter>,
}

struct Inner {
    max_permits: usize,
    state: Mutex<State>,
    next_waiter_id: AtomicU64,
}

/// A counting semaphore. Cloning shares the underlying permit pool.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

/// Returned when a caller is cancelled while waiting for a permit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancelled {
    pub reason: Option<String>,
}

/// Why a wait for a permit failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The caller's token fired, or the wait queue was full.
    Cancelled(Cancelled),
    /// The semaphore's owner rejected this waiter outright (see
    /// [`Semaphore::reject_all`]).
    Rejected,
}

/// RAII guard: dropping it returns the permit to the semaphore (or hands it
/// directly to the next waiter, preserving FIFO order).
pub struct Permit {
    semaphore: Option<Arc<Inner>>,
}

impl Semaphore {
    pub fn new(max_permits: usize, max_waiters: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_permits,
                state: Mutex::new(State {
                    permits: max_permits,
                    waiters: crate::ring_buffer::RingBuffer::new(max_waiters),
                }),
                next_waiter_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn max_permits(&self) -> usize {
        self.inner.max_permits
    }

    pub fn available_permits(&self) -> usize {
        self.inner.state.lock().unwrap().permits
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().unwrap().waiters.len()
    }

    /// Attempts to acquire a permit without waiting.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.inner.state.lock().unwrap();
        if state.permits > 0 {
            state.permits -= 1;
            Some(Permit {
                semaphore: Some(self.inner.clone()),
            })
        } else {
            None
        }
    }

    /// Attempts to enqueue a waiter without blocking, returning `None` if
    /// the wait queue is already full. Callers that get `Some` must then
    /// `.await` the returned future.
    pub fn try_enqueue(&self, token: &CancellationToken) -> Option<impl std::future::Future<Output = Result<Permit, AcquireError>>> {
        let mut state = self.inner.state.lock().unwrap();
        debug_assert!(state.permits == 0, "try_enqueue called with free permits");
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        if state.waiters.push(Waiter { id, sender: tx }).is_err() {
            return None;
        }
        drop(state);
        let inner = self.inner.clone();
        let token = token.clone();
        Some(async move { wait_for_permit(inner, id, rx, token).await })
    }

    /// Acquires a permit, waiting if necessary. Fails with
    /// [`AcquireError::Cancelled`] if `token` fires before a permit becomes
    /// available, or [`AcquireError::Rejected`] if [`Semaphore::reject_all`]
    /// fires while this caller is queued.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<Permit, AcquireError> {
        if token.is_cancelled() {
            return Err(AcquireError::Cancelled(Cancelled {
                reason: token.reason(),
            }));
        }
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }
        match self.try_enqueue(token) {
            Some(fut) => fut.await,
            None => Err(AcquireError::Cancelled(Cancelled {
                reason: Some("wait queue full".to_string()),
            })),
        }
    }

    /// Rejects every currently-queued waiter; used when a bulkhead closes.
    /// Each queued `acquire` resolves to [`AcquireError::Rejected`] rather
    /// than being handed a permit.
    pub fn reject_all(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let waiters = state.waiters.drain();
        drop(state);
        for w in waiters {
            let _ = w.sender.send(Wake::Rejected);
        }
    }
}

async fn wait_for_permit(
    inner: Arc<Inner>,
    id: u64,
    mut rx: oneshot::Receiver<Wake>,
    token: CancellationToken,
) -> Result<Permit, AcquireError> {
    tokio::select! {
        biased;
        res = &mut rx => {
            match res {
                Ok(Wake::Granted) => Ok(Permit { semaphore: Some(inner) }),
                Ok(Wake::Rejected) => Err(AcquireError::Rejected),
                Err(_) => Err(AcquireError::Cancelled(Cancelled { reason: Some("semaphore dropped".to_string()) })),
            }
        }
        _ = token.cancelled() => {
            let mut state = inner.state.lock().unwrap();
            if state.waiters.remove_where(|w| w.id == id).is_some() {
                // Successfully removed before being woken: no permit was
                // ever handed to us.
                Err(AcquireError::Cancelled(Cancelled { reason: token.reason() }))
            } else {
                // Lost the race: `release` or `reject_all` already dequeued
                // us and is about to send. Wait for it to find out which: a
                // granted permit must be forwarded to the next waiter since
                // we can no longer use it; a rejection carries nothing to
                // release.
                drop(state);
                if let Ok(Wake::Granted) = rx.await {
                    release(&inner);
                }
                Err(AcquireError::Cancelled(Cancelled { reason: token.reason() }))
            }
        }
    }
}

fn release(inner: &Arc<Inner>) {
    let mut state = inner.state.lock().unwrap();
    if let Some(waiter) = state.waiters.shift() {
        drop(state);
        // Hand the permit directly to the waiter; if it's gone (its
        // receiver dropped because it was already cancelled-and-removed by
        // a separate path) fall through and make the permit available
        // again.
        if waiter.sender.send(()).is_err() {
            release(inner);
        }
    } else {
        state.permits = (state.permits + 1).min(inner.max_permits);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(inner) = self.semaphore.take() {
            release(&inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn try_acquire_succeeds_within_limit() {
        let sem = Semaphore::new(2, 8);
        let p1 = sem.try_acquire();
        let p2 = sem.try_acquire();
        let p3 = sem.try_acquire();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(p3.is_none());
    }

    #[tokio::test]
    async fn dropping_permit_releases_it() {
        let sem = Semaphore::new(1, 8);
        let p1 = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        drop(p1);
        assert!(sem.try_acquire().is_some());
    }

    #[tokio::test]
    async fn waiters_are_served_fifo() {
        let sem = Semaphore::new(1, 8);
        let _held = sem.try_acquire().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let sem = sem.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5 * i as u64)).await;
                let token = CancellationToken::new();
                let permit = sem.acquire(&token).await.unwrap();
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(_held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancelled_waiter_is_removed_and_does_not_consume_a_permit() {
        let sem = Semaphore::new(1, 8);
        let _held = sem.try_acquire().unwrap();

        let token = CancellationToken::new();
        let sem2 = sem.clone();
        let token2 = token.clone();
        let waiting = tokio::spawn(async move { sem2.acquire(&token2).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sem.queue_len(), 1);
        token.cancel(Some("give up".to_string()));

        let result = waiting.await.unwrap();
        assert!(result.is_err());
        assert_eq!(sem.queue_len(), 0);

        drop(_held);
        assert!(sem.try_acquire().is_some());
    }

    #[tokio::test]
    async fn reject_all_fails_queued_waiters_without_granting_a_permit() {
        let sem = Semaphore::new(1, 8);
        let _held = sem.try_acquire().unwrap();

        let token = CancellationToken::new();
        let sem2 = sem.clone();
        let token2 = token.clone();
        let waiting = tokio::spawn(async move { sem2.acquire(&token2).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sem.queue_len(), 1);
        sem.reject_all();

        let result = waiting.await.unwrap();
        assert_eq!(result, Err(AcquireError::Rejected));
        assert_eq!(sem.queue_len(), 0);
        assert!(sem.try_acquire().is_none());
    }

    #[tokio::test]
    async fn permit_conservation_under_mixed_completion_and_cancellation() {
        let sem = Semaphore::new(2, 64);
        let mut handles = Vec::new();
        for i in 0..20 {
            let sem = sem.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                if i % 3 == 0 {
                    let t2 = token.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        t2.cancel(None);
                    });
                }
                if let Ok(permit) = sem.acquire(&token).await {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    drop(permit);
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
        assert_eq!(sem.available_permits(), sem.max_permits());
        assert_eq!(sem.queue_len(), 0);
    }
}
