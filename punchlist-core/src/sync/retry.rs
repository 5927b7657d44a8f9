use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Exponential backoff between upload attempts of a failed operation.
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`, capped at
/// `max_delay`, plus up to half of that again as random jitter. A zero
/// `base_delay` disables backoff: failed operations are eligible on the
/// next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before the given retry, without jitter.
    pub fn base_delay_for(&self, retry_count: u32) -> Duration {
        if self.base_delay.is_zero() || retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry_count - 1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay = self.base_delay_for(retry_count);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter = (delay.as_millis() / 2) as u64;
        let jitter = rand::rng().random_range(0..=max_jitter);
        delay + Duration::from_millis(jitter)
    }

    /// When the operation may next be attempted, or `None` for right away.
    pub fn next_attempt(&self, retry_count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.delay_for(retry_count);
        if delay.is_zero() {
            return None;
        }
        chrono::Duration::from_std(delay).ok().map(|d| now + d)
    }
}
