use std::time::Duration;

use crate::error::SyncError;

/// Bounded exponential backoff for idempotent fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
}

impl RetryPolicy {
    /// Exponential policy starting at `base_delay_ms`, capped at `max_delay_ms`.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_retries,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Same delays with a different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before retry number `attempt` (zero-based), honoring a larger server hint.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let multiplier = 1_u64 << attempt.min(20);
        let backoff = self.base_delay_ms.saturating_mul(multiplier);
        let bounded = backoff
            .max(retry_after_hint_ms.unwrap_or(0))
            .min(self.max_delay_ms);
        Duration::from_millis(bounded)
    }

    /// Delay before retrying after `err`, or `None` when the failure is final.
    pub fn next_delay(&self, err: &SyncError, attempt: u32) -> Option<Duration> {
        (err.is_retryable() && attempt < self.max_retries)
            .then(|| self.delay_for_attempt(attempt, err.retry_after_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(250, 5_000, 2)
    }
}
