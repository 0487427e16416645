//! Exponential backoff with additive jitter
//!
//! `delay(attempt) = min(base * 2^(attempt-1), max) + jitter`, where the
//! jitter is uniform in `[0, jitter_ratio * capped)` and is never subtracted.

use mesh_core::RecoveryConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay of the first attempt
    pub base: Duration,
    /// Ceiling before jitter
    pub max: Duration,
    /// Jitter upper bound as a fraction of the capped delay
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    /// Policy with the given base and ceiling and 10% jitter
    #[inline]
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_ratio: 0.1,
        }
    }

    /// Read the policy from recovery configuration
    #[must_use]
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            base: config.base_delay(),
            max: config.max_delay(),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Capped delay for `attempt` (1-based) before jitter
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay for `attempt` with a caller-supplied jitter sample in `[0, 1)`
    #[must_use]
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let capped = self.capped_delay(attempt);
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        capped + capped.mul_f64(self.jitter_ratio * sample)
    }

    /// Delay for `attempt` with fresh random jitter
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::rng().random();
        self.delay_with_sample(attempt, sample)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        let capped: Vec<u64> = (1..=7).map(|a| policy.capped_delay(a).as_secs()).collect();
        assert_eq!(capped, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.capped_delay(0), Duration::from_secs(1));
        assert_eq!(policy.capped_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_is_additive_and_bounded() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay_with_sample(3, 0.0), Duration::from_secs(4));
        assert_eq!(policy.delay_with_sample(3, 1.0), Duration::from_millis(4_400));
        assert_eq!(policy.delay_with_sample(3, f64::NAN), Duration::from_secs(4));
    }

    #[test]
    fn random_delay_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=8 {
            let capped = policy.capped_delay(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= capped);
            assert!(delay <= capped + capped / 10);
        }
    }
}
