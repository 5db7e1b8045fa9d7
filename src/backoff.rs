//! Backoff delay calculation used by [`crate::retry::RetryPolicy`].

use std::time::Duration;

/// One hour: the hard ceiling every computed delay is clamped to, regardless
/// of configured `max_delay`, to defend against overflow and runaway waits.
const ABSOLUTE_MAX_DELAY: Duration = Duration::from_secs(60 * 60);

/// A backoff strategy. `multiplier` only applies to [`Backoff::Exponential`]
/// and [`Backoff::Linear`]; it is a free parameter (not hardcoded to 2.0 or
/// `attempt`) so callers can tune growth rate independently of attempt
/// number.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Constant {
        delay: Duration,
    },
    Linear {
        base: Duration,
        multiplier: f64,
    },
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Option<Duration>,
    },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Self::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Self::Linear {
            base,
            multiplier: 1.0,
        }
    }

    pub fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            multiplier: 2.0,
            max: None,
        }
    }

    /// Overrides the growth multiplier. A no-op on [`Backoff::Constant`].
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        match &mut self {
            Self::Linear { multiplier: m, .. } => *m = multiplier,
            Self::Exponential { multiplier: m, .. } => *m = multiplier,
            Self::Constant { .. } => {}
        }
        self
    }

    /// Sets an upper bound on the computed delay. A no-op on
    /// [`Backoff::Constant`] (there is nothing to bound) and on
    /// [`Backoff::Linear`] (bounded instead by `max_attempts` in practice);
    /// applies only to [`Backoff::Exponential`].
    pub fn with_max(mut self, max: Duration) -> Self {
        if let Self::Exponential { max: m, .. } = &mut self {
            *m = Some(max);
        }
        self
    }

    /// Computes the delay before the given 1-indexed `attempt`, clamped to
    /// `[0, min(configured max, ABSOLUTE_MAX_DELAY)]` and defended against
    /// overflow at large attempt numbers.
    pub fn delay(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self {
            Self::Constant { delay } => *delay,
            Self::Linear { base, multiplier } => {
                let factor = (attempt as f64) * multiplier;
                scale(*base, factor)
            }
            Self::Exponential {
                base,
                multiplier,
                max,
            } => {
                let exponent = (attempt - 1) as i32;
                let factor = multiplier.max(1.0).powi(exponent.min(64));
                let raw = scale(*base, factor);
                match max {
                    Some(m) => raw.min(*m),
                    None => raw,
                }
            }
        };
        raw.min(ABSOLUTE_MAX_DELAY)
    }
}

fn scale(base: Duration, factor: f64) -> Duration {
    if !factor.is_finite() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let nanos = base.as_nanos() as f64 * factor;
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return ABSOLUTE_MAX_DELAY;
    }
    Duration::from_nanos(nanos as u64)
}
