//! Subcommand definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use ferry_core::config::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES};
use ferry_core::{Priority, QueueConfig, RetryBackoff};

/// Snapshot interval used by the CLI; fast enough for smooth progress bars.
const CLI_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more files
    Get(GetArgs),
}

/// Arguments for `ferry get`.
#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    /// URLs to download (magnet links are accepted but have no backend)
    #[arg(required = true)]
    pub locators: Vec<String>,

    /// Directory (or file path, for a single download) to write into
    #[arg(short, long, env = "FERRY_DEST", default_value = ".")]
    pub dest: PathBuf,

    /// Priority for these downloads: high, normal or low
    #[arg(short, long, env = "FERRY_PRIORITY", default_value = "normal")]
    pub priority: Priority,

    /// Maximum downloads running at once
    #[arg(short = 'j', long, env = "FERRY_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENT)]
    pub concurrency: u32,

    /// Automatic retries per download for network errors
    #[arg(long, env = "FERRY_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub retries: u32,

    /// Delay before a failed download is retried, in milliseconds
    #[arg(long, env = "FERRY_RETRY_DELAY_MS", default_value_t = 5000)]
    pub retry_delay_ms: u64,

    /// Double the retry delay after each failure, up to this many milliseconds
    #[arg(long, env = "FERRY_MAX_RETRY_DELAY_MS")]
    pub max_retry_delay_ms: Option<u64>,

    /// Keep queue state in this JSON file so interrupted downloads resume
    #[arg(long, env = "FERRY_STATE")]
    pub state: Option<PathBuf>,
}

impl GetArgs {
    /// Queue configuration for these arguments.
    pub fn queue_config(&self) -> QueueConfig {
        let backoff = self
            .max_retry_delay_ms
            .map_or(RetryBackoff::Fixed, |max| RetryBackoff::Exponential {
                max_delay: Duration::from_millis(max),
            });

        QueueConfig::new()
            .with_max_concurrent(self.concurrency)
            .with_max_retries(self.retries)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_backoff(backoff)
            .with_broadcast_interval(CLI_REFRESH_INTERVAL)
    }
}
