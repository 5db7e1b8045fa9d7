//! The unified error type threaded through every primitive in this crate.

use std::fmt;
use std::time::Duration;

/// Maximum number of individual retry failures retained in a
/// [`ResilienceError::MaxAttemptsReached`] error before older ones are dropped.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Marker trait letting an application error opt into "this is safe to retry"
/// without the caller having to supply an explicit predicate every time.
///
/// A blanket impl is intentionally not provided: whether an error is
/// retryable is a property of the application's domain, not of the type
/// system, so implementers opt in explicitly.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// The error type returned by every primitive's `execute`.
///
/// Generic over the caller's own operation error `E`.
pub enum ResilienceError<E> {
    /// The operation did not complete within the configured timeout.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The bulkhead had no free permit and no room in its wait queue.
    BulkheadFull { in_flight: usize, max: usize },
    /// The bulkhead has been closed and rejects all new admissions.
    BulkheadClosed,
    /// The circuit breaker is open and is rejecting admissions.
    CircuitOpen {
        consecutive_failures: usize,
        open_duration: Duration,
    },
    /// The rate limiter denied the request.
    RateLimitExceeded { wait: Duration },
    /// The retry loop exhausted its configured attempts.
    MaxAttemptsReached { attempts: usize, failures: Vec<E> },
    /// The operation was cancelled via its [`crate::token::CancellationToken`].
    Cancelled { reason: Option<String> },
    /// The rate-limit storage backend is unreachable.
    StorageUnavailable(String),
    /// The rate-limit storage backend did not respond in time.
    StorageTimeout,
    /// A rate-limit key exceeded the maximum permitted length.
    KeyTooLong { len: usize, max: usize },
    /// The bucket state read back from storage was not well-formed.
    InvalidBucketState(String),
    /// A `take` request asked for more tokens than the bucket's burst size.
    TokensExceeded { requested: f64, burst: f64 },
    /// A health check performed by a primitive failed.
    HealthCheckFailed(String),
    /// The wrapped operation itself failed.
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => Self::Timeout {
                elapsed: *elapsed,
                timeout: *timeout,
            },
            Self::BulkheadFull { in_flight, max } => Self::BulkheadFull {
                in_flight: *in_flight,
                max: *max,
            },
            Self::BulkheadClosed => Self::BulkheadClosed,
            Self::CircuitOpen {
                consecutive_failures,
                open_duration,
            } => Self::CircuitOpen {
                consecutive_failures: *consecutive_failures,
                open_duration: *open_duration,
            },
            Self::RateLimitExceeded { wait } => Self::RateLimitExceeded { wait: *wait },
            Self::MaxAttemptsReached { attempts, failures } => Self::MaxAttemptsReached {
                attempts: *attempts,
                failures: failures.clone(),
            },
            Self::Cancelled { reason } => Self::Cancelled {
                reason: reason.clone(),
            },
            Self::StorageUnavailable(s) => Self::StorageUnavailable(s.clone()),
            Self::StorageTimeout => Self::StorageTimeout,
            Self::KeyTooLong { len, max } => Self::KeyTooLong {
                len: *len,
                max: *max,
            },
            Self::InvalidBucketState(s) => Self::InvalidBucketState(s.clone()),
            Self::TokensExceeded { requested, burst } => Self::TokensExceeded {
                requested: *requested,
                burst: *burst,
            },
            Self::HealthCheckFailed(s) => Self::HealthCheckFailed(s.clone()),
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Timeout { elapsed: e1, timeout: t1 },
                Self::Timeout { elapsed: e2, timeout: t2 },
            ) => e1 == e2 && t1 == t2,
            (
                Self::BulkheadFull { in_flight: a, max: b },
                Self::BulkheadFull { in_flight: c, max: d },
            ) => a == c && b == d,
            (Self::BulkheadClosed, Self::BulkheadClosed) => true,
            (
                Self::CircuitOpen { consecutive_failures: a, open_duration: b },
                Self::CircuitOpen { consecutive_failures: c, open_duration: d },
            ) => a == c && b == d,
            (Self::RateLimitExceeded { wait: a }, Self::RateLimitExceeded { wait: b }) => a == b,
            (
                Self::MaxAttemptsReached { attempts: a, failures: b },
                Self::MaxAttemptsReached { attempts: c, failures: d },
            ) => a == c && b == d,
            (Self::Cancelled { reason: a }, Self::Cancelled { reason: b }) => a == b,
            (Self::StorageUnavailable(a), Self::StorageUnavailable(b)) => a == b,
            (Self::StorageTimeout, Self::StorageTimeout) => true,
            (Self::KeyTooLong { len: a, max: b }, Self::KeyTooLong { len: c, max: d }) => {
                a == c && b == d
            }
            (Self::InvalidBucketState(a), Self::InvalidBucketState(b)) => a == b,
            (
                Self::TokensExceeded { requested: a, burst: b },
                Self::TokensExceeded { requested: c, burst: d },
            ) => a == c && b == d,
            (Self::HealthCheckFailed(a), Self::HealthCheckFailed(b)) => a == b,
            (Self::Inner(a), Self::Inner(b)) => a == b,
            _ => false,
        }
    }
}
impl<E: Eq> Eq for ResilienceError<E> {}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {elapsed:?} (limit {timeout:?})")
            }
            Self::BulkheadFull { in_flight, max } => {
                write!(f, "bulkhead full: {in_flight}/{max} in flight")
            }
            Self::BulkheadClosed => write!(f, "bulkhead is closed"),
            Self::CircuitOpen {
                consecutive_failures,
                open_duration,
            } => write!(
                f,
                "circuit open after {consecutive_failures} consecutive failures, open for {open_duration:?}"
            ),
            Self::RateLimitExceeded { wait } => {
                write!(f, "rate limit exceeded, retry after {wait:?}")
            }
            Self::MaxAttemptsReached { attempts, .. } => {
                write!(f, "retry exhausted after {attempts} attempts")
            }
            Self::Cancelled { reason } => match reason {
                Some(r) => write!(f, "operation cancelled: {r}"),
                None => write!(f, "operation cancelled"),
            },
            Self::StorageUnavailable(s) => write!(f, "rate limit storage unavailable: {s}"),
            Self::StorageTimeout => write!(f, "rate limit storage timed out"),
            Self::KeyTooLong { len, max } => {
                write!(f, "rate limit key too long: {len} bytes (max {max})")
            }
            Self::InvalidBucketState(s) => write!(f, "invalid bucket state: {s}"),
            Self::TokensExceeded { requested, burst } => write!(
                f,
                "requested {requested} tokens exceeds bucket burst of {burst}"
            ),
            Self::HealthCheckFailed(s) => write!(f, "health check failed: {s}"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => f
                .debug_struct("Timeout")
                .field("elapsed", elapsed)
                .field("timeout", timeout)
                .finish(),
            Self::BulkheadFull { in_flight, max } => f
                .debug_struct("BulkheadFull")
                .field("in_flight", in_flight)
                .field("max", max)
                .finish(),
            Self::BulkheadClosed => write!(f, "BulkheadClosed"),
            Self::CircuitOpen {
                consecutive_failures,
                open_duration,
            } => f
                .debug_struct("CircuitOpen")
                .field("consecutive_failures", consecutive_failures)
                .field("open_duration", open_duration)
                .finish(),
            Self::RateLimitExceeded { wait } => {
                f.debug_struct("RateLimitExceeded").field("wait", wait).finish()
            }
            Self::MaxAttemptsReached { attempts, failures } => f
                .debug_struct("MaxAttemptsReached")
                .field("attempts", attempts)
                .field("failures_recorded", &failures.len())
                .finish(),
            Self::Cancelled { reason } => {
                f.debug_struct("Cancelled").field("reason", reason).finish()
            }
            Self::StorageUnavailable(s) => f.debug_tuple("StorageUnavailable").field(s).finish(),
            Self::StorageTimeout => write!(f, "StorageTimeout"),
            Self::KeyTooLong { len, max } => f
                .debug_struct("KeyTooLong")
                .field("len", len)
                .field("max", max)
                .finish(),
            Self::InvalidBucketState(s) => f.debug_tuple("InvalidBucketState").field(s).finish(),
            Self::TokensExceeded { requested, burst } => f
                .debug_struct("TokensExceeded")
                .field("requested", requested)
                .field("burst", burst)
                .finish(),
            Self::HealthCheckFailed(s) => f.debug_tuple("HealthCheckFailed").field(s).finish(),
            Self::Inner(e) => f.debug_tuple("Inner").field(e).finish(),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::MaxAttemptsReached { failures, .. } => {
                failures.last().map(|e| e as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_bulkhead_full(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. })
    }

    pub fn is_bulkhead_closed(&self) -> bool {
        matches!(self, Self::BulkheadClosed)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    pub fn is_max_attempts_reached(&self) -> bool {
        matches!(self, Self::MaxAttemptsReached { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::MaxAttemptsReached { failures, .. } => Some(failures),
            _ => None,
        }
    }

    /// Constructs a [`ResilienceError::Cancelled`] from a token's abort reason.
    pub fn cancelled(reason: Option<String>) -> Self {
        Self::Cancelled { reason }
    }
}

/// Pushes `failure` onto `failures`, dropping the oldest entry once
/// [`MAX_RETRY_FAILURES`] is exceeded so a pathological retry budget cannot
/// grow the error unbounded.
pub(crate) fn push_bounded<E>(failures: &mut Vec<E>, failure: E) {
    if failures.len() >= MAX_RETRY_FAILURES {
        failures.remove(0);
    }
    failures.push(failure);
}
