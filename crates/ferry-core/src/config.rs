//! Queue configuration and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of transfers running at once.
pub const DEFAULT_MAX_CONCURRENT: u32 = 3;
/// Default retry budget per transfer.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before a retry becomes eligible.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Default snapshot throttle window.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);
/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

const MAX_CONCURRENT_LIMIT: u32 = 64;
const MAX_RETRIES_LIMIT: u32 = 100;
const MIN_BROADCAST_INTERVAL: Duration = Duration::from_millis(50);

/// How the retry delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryBackoff {
    /// Every retry waits `retry_delay`.
    #[default]
    Fixed,
    /// `retry_delay * 2^(attempt - 1)`, capped at `max_delay`.
    Exponential {
        #[serde(rename = "max_delay_ms", with = "duration_ms")]
        max_delay: Duration,
    },
}

/// Configuration for the transfer queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum transfers in `Downloading` at once. Zero holds all admissions.
    pub max_concurrent: u32,
    /// Retries allowed per transfer before it is pinned at `Failed`.
    pub max_retries: u32,
    /// Base wait before a failed transfer becomes eligible again.
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    pub backoff: RetryBackoff,
    /// Snapshot throttle window.
    #[serde(rename = "broadcast_interval_ms", with = "duration_ms")]
    pub broadcast_interval: Duration,
    /// Capacity of the broadcast channel; slow subscribers lag past this.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            backoff: RetryBackoff::Fixed,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum concurrent transfers.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the snapshot throttle window.
    #[must_use]
    pub const fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max concurrent transfers: {0}. Must be at most 64")]
    InvalidMaxConcurrent(u32),

    #[error("Invalid max retries: {0}. Must be at most 100")]
    InvalidMaxRetries(u32),

    #[error("Invalid broadcast interval: {0}ms. Must be at least 50ms")]
    InvalidBroadcastInterval(u128),

    #[error("Event capacity must be at least 1")]
    InvalidEventCapacity,

    #[error("Exponential backoff max delay ({max_ms}ms) is below the base retry delay ({base_ms}ms)")]
    InvalidBackoffCap { base_ms: u128, max_ms: u128 },
}

/// Validate configuration values.
pub fn validate_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.max_concurrent > MAX_CONCURRENT_LIMIT {
        return Err(ConfigError::InvalidMaxConcurrent(config.max_concurrent));
    }

    if config.max_retries > MAX_RETRIES_LIMIT {
        return Err(ConfigError::InvalidMaxRetries(config.max_retries));
    }

    if config.broadcast_interval < MIN_BROADCAST_INTERVAL {
        return Err(ConfigError::InvalidBroadcastInterval(
            config.broadcast_interval.as_millis(),
        ));
    }

    if config.event_capacity == 0 {
        return Err(ConfigError::InvalidEventCapacity);
    }

    if let RetryBackoff::Exponential { max_delay } = config.backoff {
        if max_delay < config.retry_delay {
            return Err(ConfigError::InvalidBackoffCap {
                base_ms: config.retry_delay.as_millis(),
                max_ms: max_delay.as_millis(),
            });
        }
    }

    Ok(())
}

/// Serde helper storing a [`Duration`] as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
