//! CLOSED / OPEN / HALF-OPEN circuit breaker with pluggable trip and success
//! predicates, lock-free admission on the hot path.

use crate::clock::{Clock, MonotonicClock};
use crate::error::ResilienceError;
use std::fmt::Debug;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            STATE_OPEN => Self::Open,
            STATE_HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Request counters tracked while the circuit is CLOSED, used to decide
/// whether to trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
}

impl Counts {
    fn on_success(&mut self) {
        self.requests += 1;
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn reset(&mut self) {
        *self = Counts::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerConfigError {
    ZeroFailureThreshold,
    ZeroHalfOpenRequests,
    InvalidJitter(String),
}

impl std::fmt::Display for CircuitBreakerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroFailureThreshold => write!(f, "failure_threshold must be >= 1"),
            Self::ZeroHalfOpenRequests => write!(f, "half_open_max_requests must be >= 1"),
            Self::InvalidJitter(msg) => write!(f, "invalid timeout_jitter: {msg}"),
        }
    }
}
impl std::error::Error for CircuitBreakerConfigError {}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_requests: usize,
    /// `0` disables the periodic reset timer.
    pub interval: Duration,
    /// Fraction in `[0, 1]` of `recovery_timeout` added as jitter before
    /// each OPEN -> HALF-OPEN transition is permitted.
    pub timeout_jitter: f64,
    pub ready_to_trip: Option<Arc<dyn Fn(&Counts) -> bool + Send + Sync>>,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Result<Self, CircuitBreakerConfigError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerConfigError::ZeroFailureThreshold);
        }
        Ok(Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_requests: 1,
            interval: Duration::ZERO,
            timeout_jitter: 0.0,
            ready_to_trip: None,
        })
    }

    /// A breaker that never trips: used where callers want the uniform
    /// `execute` surface without actual circuit-breaking behaviour.
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::from_secs(1),
            half_open_max_requests: 1,
            interval: Duration::ZERO,
            timeout_jitter: 0.0,
            ready_to_trip: Some(Arc::new(|_| false)),
        }
    }

    pub fn with_half_open_max_requests(mut self, n: usize) -> Result<Self, CircuitBreakerConfigError> {
        if n == 0 {
            return Err(CircuitBreakerConfigError::ZeroHalfOpenRequests);
        }
        self.half_open_max_requests = n;
        Ok(self)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout_jitter(mut self, jitter: f64) -> Result<Self, CircuitBreakerConfigError> {
        if !(0.0..=1.0).contains(&jitter) {
            return Err(CircuitBreakerConfigError::InvalidJitter(format!(
                "{jitter} not in [0, 1]"
            )));
        }
        self.timeout_jitter = jitter;
        Ok(self)
    }

    pub fn with_ready_to_trip(mut self, f: impl Fn(&Counts) -> bool + Send + Sync + 'static) -> Self {
        self.ready_to_trip = Some(Arc::new(f));
        self
    }

    fn should_trip(&self, counts: &Counts) -> bool {
        match &self.ready_to_trip {
            Some(f) => f(counts),
            None => counts.consecutive_failures >= self.failure_threshold as u64,
        }
    }
}

struct SharedState {
    state: AtomicU8,
    counts: Mutex<Counts>,
    state_changed_at_millis: AtomicU64,
    half_open_in_flight: AtomicUsize,
}

type IsSuccessfulHook = Arc<dyn Fn(Option<&(dyn std::error::Error + 'static)>) -> bool + Send + Sync>;

/// Lock-free-on-the-hot-path circuit breaker. Cheap to clone; clones share
/// the underlying state.
#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    shared: Arc<SharedState>,
    config: Arc<Mutex<CircuitBreakerConfig>>,
    clock: Arc<dyn Clock>,
    on_state_change: Arc<Mutex<Option<Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>>>>,
    is_successful: Arc<Mutex<Option<IsSuccessfulHook>>>,
    interval_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl CircuitBreakerPolicy {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        let interval = config.interval;
        let shared = Arc::new(SharedState {
            state: AtomicU8::new(STATE_CLOSED),
            counts: Mutex::new(Counts::default()),
            state_changed_at_millis: AtomicU64::new(now),
            half_open_in_flight: AtomicUsize::new(0),
        });
        let interval_handle = Arc::new(Mutex::new(None));
        if !interval.is_zero() {
            let shared = shared.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if CircuitState::from(shared.state.load(Ordering::Acquire)) == CircuitState::Closed {
                        shared.counts.lock().unwrap().reset();
                        tracing::debug!("circuit breaker periodic counts reset");
                    }
                }
            });
            *interval_handle.lock().unwrap() = Some(handle);
        }
        Self {
            shared,
            config: Arc::new(Mutex::new(config)),
            clock,
            on_state_change: Arc::new(Mutex::new(None)),
            is_successful: Arc::new(Mutex::new(None)),
            interval_handle,
        }
    }

    pub fn on_state_change(&self, f: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static) {
        *self.on_state_change.lock().unwrap() = Some(Arc::new(f));
    }

    /// Registers a predicate deciding whether a completed attempt should
    /// count as a success. Receives the wrapped operation's error when the
    /// attempt failed with one (`None` on success), so the predicate can
    /// inspect the actual error rather than only the `Ok`/`Err` shape.
    pub fn with_is_successful(
        self,
        f: impl Fn(Option<&(dyn std::error::Error + 'static)>) -> bool + Send + Sync + 'static,
    ) -> Self {
        *self.is_successful.lock().unwrap() = Some(Arc::new(f));
        self
    }

    /// Cancels the periodic counts-reset timer started by a nonzero
    /// `interval`. Idempotent; does not otherwise affect admission.
    pub fn destroy(&self) {
        if let Some(handle) = self.interval_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.shared.state.load(Ordering::Acquire))
    }

    pub fn counts(&self) -> Counts {
        *self.shared.counts.lock().unwrap()
    }

    fn effective_timeout(&self) -> Duration {
        let config = self.config.lock().unwrap();
        if config.timeout_jitter <= 0.0 {
            return config.recovery_timeout;
        }
        let u: f64 = rand::random();
        let factor = 1.0 + u * config.timeout_jitter;
        Duration::from_secs_f64(config.recovery_timeout.as_secs_f64() * factor)
    }

    fn transition(&self, from: CircuitState, to: u8) {
        let to_state = CircuitState::from(to);
        self.shared.state.store(to, Ordering::Release);
        self.shared
            .state_changed_at_millis
            .store(self.clock.now_millis(), Ordering::Release);
        if to == STATE_CLOSED {
            self.shared.counts.lock().unwrap().reset();
            self.shared.half_open_in_flight.store(0, Ordering::Release);
        } else if to == STATE_HALF_OPEN {
            self.shared.half_open_in_flight.store(1, Ordering::Release);
        }
        if from != to_state {
            tracing::info!(?from, to = ?to_state, "circuit breaker state change");
            if let Some(cb) = self.on_state_change.lock().unwrap().clone() {
                tokio::spawn(async move {
                    invoke_state_change_hook(&cb, from, to_state);
                });
            }
        }
    }

    /// Decides whether an operation may be admitted right now, performing
    /// the OPEN -> HALF-OPEN probe transition if the recovery window has
    /// elapsed.
    fn before_execute<E>(&self) -> Result<(), ResilienceError<E>> {
        let current = self.shared.state.load(Ordering::Acquire);
        match current {
            STATE_CLOSED => {
                tracing::debug!("circuit breaker admission granted (closed)");
                Ok(())
            }
            STATE_OPEN => {
                let changed_at = self.shared.state_changed_at_millis.load(Ordering::Acquire);
                let elapsed_ms = self.clock.now_millis().saturating_sub(changed_at);
                let timeout = self.effective_timeout();
                if elapsed_ms >= timeout.as_millis() as u64 {
                    if self
                        .shared
                        .state
                        .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.transition(CircuitState::Open, STATE_HALF_OPEN);
                    }
                    self.before_execute()
                } else {
                    let counts = self.counts();
                    tracing::warn!(
                        consecutive_failures = counts.consecutive_failures,
                        open_duration_ms = elapsed_ms,
                        "circuit breaker denied admission: open"
                    );
                    Err(ResilienceError::CircuitOpen {
                        consecutive_failures: counts.consecutive_failures as usize,
                        open_duration: Duration::from_millis(elapsed_ms),
                    })
                }
            }
            STATE_HALF_OPEN => {
                let max = self.config.lock().unwrap().half_open_max_requests;
                let prev = self.shared.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                if prev < max {
                    tracing::debug!("circuit breaker admission granted (half-open probe)");
                    Ok(())
                } else {
                    self.shared.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
                    let counts = self.counts();
                    tracing::warn!(
                        consecutive_failures = counts.consecutive_failures,
                        "circuit breaker denied admission: half-open probe limit reached"
                    );
                    Err(ResilienceError::CircuitOpen {
                        consecutive_failures: counts.consecutive_failures as usize,
                        open_duration: Duration::ZERO,
                    })
                }
            }
            _ => unreachable!("invalid circuit breaker state byte"),
        }
    }

    fn record(&self, success: bool) {
        let current = CircuitState::from(self.shared.state.load(Ordering::Acquire));
        let mut counts = self.shared.counts.lock().unwrap();
        if success {
            counts.on_success();
        } else {
            counts.on_failure();
        }
        let snapshot = *counts;
        drop(counts);

        match current {
            CircuitState::Closed => {
                if !success && self.config.lock().unwrap().should_trip(&snapshot) {
                    if self
                        .shared
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.transition(CircuitState::Closed, STATE_OPEN);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    if self
                        .shared
                        .state
                        .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.transition(CircuitState::HalfOpen, STATE_CLOSED);
                    }
                } else if self
                    .shared
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.transition(CircuitState::HalfOpen, STATE_OPEN);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn execute<T, E, Fut, Op>(
        &self,
        mut operation: Op,
        token: crate::token::CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut(crate::token::CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        E: std::error::Error + 'static,
    {
        if token.is_cancelled() {
            return Err(ResilienceError::cancelled(token.reason()));
        }
        self.before_execute()?;
        let result = operation(token.child_token()).await;
        if matches!(result, Err(ResilienceError::Cancelled { .. })) {
            // Cancellation is never counted as a failure.
            return result;
        }
        let is_successful_hook = self.is_successful.lock().unwrap().clone();
        let success = match (&result, &is_successful_hook) {
            (Ok(_), Some(hook)) => hook(None),
            (Ok(_), None) => true,
            (Err(ResilienceError::Inner(e)), Some(hook)) => {
                hook(Some(e as &(dyn std::error::Error + 'static)))
            }
            (Err(_), _) => false,
        };
        self.record(success);
        result
    }

    /// Forces the breaker back to CLOSED and clears its counters.
    pub fn reset(&self) {
        let previous = self.state();
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        self.shared.counts.lock().unwrap().reset();
        self.shared.half_open_in_flight.store(0, Ordering::Release);
        self.shared
            .state_changed_at_millis
            .store(self.clock.now_millis(), Ordering::Release);
        if previous != CircuitState::Closed {
            tracing::info!(from = ?previous, to = ?CircuitState::Closed, "circuit breaker state change (reset)");
            if let Some(cb) = self.on_state_change.lock().unwrap().clone() {
                tokio::spawn(async move {
                    invoke_state_change_hook(&cb, previous, CircuitState::Closed);
                });
            }
        }
    }
}

/// Runs an `on_state_change` callback, catching and logging a panic rather
/// than letting it escape the spawned task silently.
fn invoke_state_change_hook(
    cb: &Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>,
    from: CircuitState,
    to: CircuitState,
) {
    if catch_unwind(AssertUnwindSafe(|| cb(from, to))).is_err() {
        tracing::error!("circuit breaker on_state_change callback panicked");
    }
}
