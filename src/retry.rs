use std::time::Duration;

use rand::Rng as _;

/// Exponential backoff used when the API answers 429 without a usable
/// `retry-after` header. Any other failure is never retried.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl BackoffConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }

    /// Whether another unsignalled retry is allowed after `attempts` of them.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}
