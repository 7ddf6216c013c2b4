//! Bounded retry for optimistic-concurrency conflicts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// `base * 2^(attempt - 1)`, capped.
    #[default]
    Exponential,
}

/// How many times a conflicting read-compute-write cycle is re-run, and how
/// long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    ///
    /// Jitter is deterministic per attempt so that behavior is reproducible.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                (base_ms * 2_f64.powi(attempt.saturating_sub(1).min(30) as i32)).min(max_ms)
            }
        };

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let pseudo_random = ((attempt as f64 * 37.0) % 100.0) / 100.0;
        let jittered = delay_ms + jitter_range * (pseudo_random - 0.5) * 2.0;

        let capped_ms = jittered.clamp(0.0, max_ms.max(base_ms));
        Duration::from_micros((capped_ms * 1000.0).round() as u64)
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        RetryPolicy::exponential(
            cfg.max_attempts.max(1),
            Duration::from_millis(cfg.base_delay_ms),
            Duration::from_millis(cfg.max_delay_ms.max(cfg.base_delay_ms)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays_grow_and_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(8, Duration::from_millis(5), Duration::from_millis(100))
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds_and_is_deterministic() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            let d = policy.delay_for_attempt(attempt);
            assert!(d <= policy.max_delay);
            assert_eq!(d, policy.delay_for_attempt(attempt));
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }
}
