//! Explicit, first-class cancellation propagation.
//!
//! Every primitive's `execute` threads a [`CancellationToken`] down into the
//! user operation and observes it at every suspension point. Tokens are
//! cheap to clone (an `Arc` around shared state) and may be combined or
//! derived into child tokens.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// A cooperative cancellation signal.
///
/// Cloning a token shares the same underlying abort flag; calling
/// [`CancellationToken::cancel`] on any clone aborts all of them.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// A token that can never be cancelled; the default for callers that
    /// don't need cooperative cancellation.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap().clone()
    }

    /// Aborts this token (and every clone/descendant observing it) with an
    /// optional human-readable reason. Idempotent: cancelling an
    /// already-cancelled token is a no-op.
    pub fn cancel(&self, reason: impl Into<Option<String>>) {
        if self
            .inner
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.inner.reason.lock().unwrap() = reason.into();
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolves once this token is cancelled. Resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Notify::notified() must be constructed before we re-check the
        // flag, or a cancel() between the check and the await would be
        // missed.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Derives a child token: it observes this token's cancellation but
    /// cancelling the child does not propagate back to the parent.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        if self.is_cancelled() {
            child.cancel(self.reason());
            return child;
        }
        let parent = self.clone();
        let child_clone = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            child_clone.cancel(parent.reason());
        });
        child
    }

    /// Combines two tokens into one that cancels when either input cancels,
    /// carrying the reason of whichever fired first.
    pub fn combine(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
        let combined = CancellationToken::new();
        if a.is_cancelled() {
            combined.cancel(a.reason());
            return combined;
        }
        if b.is_cancelled() {
            combined.cancel(b.reason());
            return combined;
        }
        let (a1, b1) = (a.clone(), b.clone());
        let out1 = combined.clone();
        tokio::spawn(async move {
            a1.cancelled().await;
            out1.cancel(a1.reason());
        });
        let (a2, b2) = (a.clone(), b.clone());
        let out2 = combined.clone();
        tokio::spawn(async move {
            b2.cancelled().await;
            out2.cancel(b2.reason());
            let _ = &a2;
        });
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel(Some("first".to_string()));
        token.cancel(Some("second".to_string()));
        assert_eq!(token.reason(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel(None);
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn cancelled_resolves_when_cancel_called_later() {
        let token = CancellationToken::new();
        let t2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            t2.cancel(Some("late".to_string()));
        });
        tokio::time::timeout(Duration::from_millis(200), token.cancelled())
            .await
            .expect("should resolve once cancelled");
        assert_eq!(token.reason(), Some("late".to_string()));
    }

    #[tokio::test]
    async fn child_token_observes_parent_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel(Some("parent gone".to_string()));
        tokio::time::timeout(Duration::from_millis(200), child.cancelled())
            .await
            .expect("child observes parent");
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel(Some("child only".to_string()));
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn combine_fires_on_either_input() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let combined = CancellationToken::combine(&a, &b);
        assert!(!combined.is_cancelled());
        b.cancel(Some("b fired".to_string()));
        tokio::time::timeout(Duration::from_millis(200), combined.cancelled())
            .await
            .expect("combined observes b");
        assert_eq!(combined.reason(), Some("b fired".to_string()));
    }

    #[tokio::test]
    async fn combine_already_cancelled_input_fires_immediately() {
        let a = CancellationToken::new();
        a.cancel(Some("already".to_string()));
        let b = CancellationToken::new();
        let combined = CancellationToken::combine(&a, &b);
        assert!(combined.is_cancelled());
    }
}
