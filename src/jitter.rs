//! Randomised perturbation of a backoff delay, applied after
//! [`crate::backoff::Backoff::delay`].

use rand::Rng;
use std::time::Duration;

/// A jitter strategy. [`Jitter::Equal`] is what most callers want: it
/// matches the conventional "uniform factor in `[0.5, 1.0]`" recipe.
#[derive(Debug, Clone, Copy, Default)]
pub enum Jitter {
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// AWS-style decorrelated jitter: `min(cap, uniform(base, prev*3))`.
    Decorrelated { base: Duration, cap: Duration },
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    pub fn apply_with_rng<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Self::None => delay,
            Self::Full => {
                if delay.is_zero() {
                    return delay;
                }
                let factor = rng.random_range(0.0..=1.0);
                scale(delay, factor)
            }
            Self::Equal => {
                if delay.is_zero() {
                    return delay;
                }
                let factor = rng.random_range(0.5..=1.0);
                scale(delay, factor)
            }
            Self::Decorrelated { base, cap } => {
                let prev_nanos = delay.as_nanos().max(base.as_nanos()) as f64;
                let lo = base.as_nanos() as f64;
                let hi = (prev_nanos * 3.0).max(lo);
                let nanos = if hi > lo {
                    rng.random_range(lo..=hi)
                } else {
                    lo
                };
                Duration::from_nanos(nanos as u64).min(*cap)
            }
        }
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    let nanos = (delay.as_nanos() as f64 * factor).max(0.0);
    Duration::from_nanos(nanos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn none_passes_through_unchanged() {
        let d = Duration::from_millis(123);
        assert_eq!(Jitter::None.apply(d), d);
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn full_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let d = Duration::from_millis(1000);
        for _ in 0..100 {
            let out = Jitter::Full.apply_with_rng(d, &mut rng);
            assert!(out <= d);
        }
    }

    #[test]
    fn equal_stays_within_half_to_full() {
        let mut rng = StdRng::seed_from_u64(7);
        let d = Duration::from_millis(1000);
        for _ in 0..100 {
            let out = Jitter::Equal.apply_with_rng(d, &mut rng);
            assert!(out >= d / 2 && out <= d);
        }
    }

    #[test]
    fn decorrelated_respects_cap() {
        let mut rng = StdRng::seed_from_u64(99);
        let jitter = Jitter::Decorrelated {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
        };
        let mut prev = Duration::from_millis(100);
        for _ in 0..50 {
            prev = jitter.apply_with_rng(prev, &mut rng);
            assert!(prev <= Duration::from_secs(5));
        }
    }
}
