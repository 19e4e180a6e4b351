//! Retry schedule: exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Retry bound and backoff schedule for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts are `1 + max_retries`.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub backoff_ms: u64,
    /// Multiplier applied per retry.
    pub backoff_factor: u64,
    /// Upper bound on a single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 200,
            backoff_factor: 2,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `retry` (0-based):
    /// `backoff_ms * backoff_factor^retry`, capped at `max_backoff_ms`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(retry));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }

    /// Jittered delay, uniformly drawn from `[base/2, base]`.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry).as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }

        let jittered = rand::thread_rng().gen_range(base / 2..=base);
        Duration::from_millis(jittered)
    }
}
