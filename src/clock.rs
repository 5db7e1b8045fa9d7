//! Monotonic time abstraction, shared by every primitive that needs to
//! measure elapsed time or schedule a future point (circuit breaker recovery
//! windows, token-bucket refill, bulkhead queue timeouts).

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A source of monotonic milliseconds since some arbitrary epoch.
///
/// Only relative differences between calls are meaningful.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> u64;
}

/// Production clock backed by [`std::time::Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Test double that only advances when told to, for deterministic tests of
/// time-sensitive transitions (circuit-breaker recovery, bucket refill).
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            millis: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Convenience: an `Arc<dyn Clock>` wrapping [`MonotonicClock::new`].
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(MonotonicClock::new())
}
