//! When a failed transfer is tried again.
//!
//! Permanent errors never retry. Transient ones retry until the budget in
//! [`QueueConfig`] is spent, after a fixed or exponential delay.

use std::time::Duration;

use ferry_core::{QueueConfig, RetryBackoff, TransferError};

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue after `delay`. `attempt` is the new retry count (1-based).
    RetryAfter { attempt: u32, delay: Duration },
    /// The error is permanent.
    Permanent,
    /// The retry budget is spent.
    Exhausted,
}

/// Retry budget and backoff for failed transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryPolicy {
    pub const fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_delay,
            backoff: config.backoff,
        }
    }

    /// Decide what to do with a transfer that has already retried
    /// `retry_count` times and just failed with `error`.
    pub fn decide(&self, retry_count: u32, error: &TransferError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::Permanent;
        }
        if retry_count >= self.max_retries {
            return RetryDecision::Exhausted;
        }

        let attempt = retry_count + 1;
        RetryDecision::RetryAfter {
            attempt,
            delay: self.delay_for(attempt),
        }
    }

    /// Backoff delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.base_delay,
            RetryBackoff::Exponential { max_delay } => {
                // base * 2^(attempt-1), shift capped so the multiplier can't overflow
                let exp = 1u32 << attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(exp).min(max_delay)
            }
        }
    }
}
