//! Retry configuration and exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How many attempts to make and how long to wait between them.
///
/// Built once per service class (STT, AI, TTS) and reused for every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    /// Add up to 25% random extra delay on top of the capped delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Speech-to-text defaults: 3 attempts, 1s base, 5s cap.
    pub fn stt() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(5))
    }

    /// Completion defaults: 3 attempts, 2s base, 10s cap.
    pub fn ai() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }

    /// Text-to-speech defaults: 3 attempts, 1s base, 5s cap.
    pub fn tts() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(5))
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the invariants, returning a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(format!(
                "exponential_base must be >= 1.0, got {}",
                self.exponential_base
            ));
        }
        Ok(())
    }

    /// Delay before the retry that follows `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::rng())
    }

    /// Same as [`delay_for`](Self::delay_for) with a caller-supplied RNG.
    ///
    /// `min(max_delay, base_delay * exponential_base^attempt)`, plus
    /// `uniform(0, 0.25 * delay)` when jitter is enabled.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = self.base_delay_ms as f64 * exp;
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };

        let total = if self.jitter {
            capped + capped * 0.25 * rng.random::<f64>()
        } else {
            capped
        };

        Duration::from_secs_f64(total.max(0.0) / 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fixed(base_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_delay_ms: base_ms,
            max_delay_ms: max_ms,
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let config = fixed(100, 800);
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(3), Duration::from_millis(800));
        assert_eq!(config.delay_for(10), Duration::from_millis(800));
    }

    #[test]
    fn test_monotonic_without_jitter() {
        let config = fixed(250, 7_000);
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = config.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= config.max_delay());
            previous = delay;
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let config = fixed(1_000, 5_000);
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_bounded_by_quarter() {
        let config = RetryConfig {
            jitter: true,
            ..fixed(400, 1_000)
        };
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..10 {
            let base = fixed(400, 1_000).delay_for(attempt);
            let delay = config.delay_with_rng(attempt, &mut rng);
            assert!(delay >= base);
            assert!(delay <= base + base / 4 + Duration::from_millis(1));
        }
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let config = RetryConfig::stt();
        let a = config.delay_with_rng(2, &mut StdRng::seed_from_u64(42));
        let b = config.delay_with_rng(2, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig { max_attempts: 0, ..RetryConfig::default() }.validate().is_err());
        assert!(fixed(2_000, 1_000).validate().is_err());
        assert!(
            RetryConfig { exponential_base: 0.5, ..RetryConfig::default() }
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_service_class_defaults() {
        assert_eq!(RetryConfig::ai().base_delay(), Duration::from_secs(2));
        assert_eq!(RetryConfig::ai().max_delay(), Duration::from_secs(10));
        assert_eq!(RetryConfig::stt().max_delay(), Duration::from_secs(5));
        assert_eq!(RetryConfig::tts().max_attempts, 3);
    }
}
