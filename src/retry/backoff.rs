//! Exponential backoff with bounded jitter.

use rand::Rng;
use std::time::Duration;

/// Source of the random jitter term added to each backoff delay
pub trait JitterSource: Send + Sync {
    /// Sample a duration in `[0, bound]`
    fn sample(&self, bound: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, bound: Duration) -> Duration {
        let bound_ms = bound.as_millis() as u64;
        if bound_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound_ms))
    }
}

/// Always zero; makes delays reproducible
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, _bound: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Delay schedule: `min(base * 2^n, cap) + jitter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter: Duration) -> Self {
        Self { base, cap, jitter }
    }

    /// Deterministic part of the delay for 0-based attempt `attempt`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.cap)
    }

    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        self.base_delay(attempt)
            .saturating_add(jitter.sample(self.jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Backoff {
        Backoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
            Duration::from_millis(1000),
        )
    }

    #[test]
    fn doubles_until_capped() {
        let backoff = schedule();
        assert_eq!(backoff.base_delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.base_delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(8000));
        assert_eq!(backoff.base_delay(4), Duration::from_millis(16_000));
        // 64s capped to 30s
        assert_eq!(backoff.base_delay(6), Duration::from_millis(30_000));
    }

    #[test]
    fn huge_attempt_saturates_at_cap() {
        let backoff = schedule();
        assert_eq!(backoff.base_delay(40), Duration::from_millis(30_000));
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn no_jitter_is_reproducible() {
        let backoff = schedule();
        for attempt in 0..8 {
            assert_eq!(
                backoff.delay(attempt, &NoJitter),
                backoff.base_delay(attempt)
            );
        }
    }

    #[test]
    fn random_jitter_stays_within_bound() {
        let backoff = schedule();
        for _ in 0..200 {
            let delay = backoff.delay(2, &RandomJitter);
            assert!(delay >= Duration::from_millis(4000));
            assert!(delay <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn zero_jitter_bound_samples_zero() {
        assert_eq!(RandomJitter.sample(Duration::ZERO), Duration::ZERO);
    }
}
