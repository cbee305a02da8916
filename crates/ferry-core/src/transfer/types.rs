//! Core identifiers and enums for transfers.
//!
//! Pure data types with no I/O dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of a transfer.
///
/// Either supplied by the caller or generated (UUID v4) when the caller has
/// no natural key of its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Create an id from a caller-supplied string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TransferId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which backend family moves the bytes for a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Plain byte-stream fetch over HTTP(S).
    Http,
    /// Peer-to-peer swarm transfer (magnet-style locator).
    Swarm,
}

impl TransferKind {
    /// Guess the kind from a locator.
    ///
    /// `magnet:` URIs are swarm transfers; everything else is treated as HTTP.
    #[must_use]
    pub fn infer(locator: &str) -> Self {
        if locator.trim_start().to_ascii_lowercase().starts_with("magnet:") {
            Self::Swarm
        } else {
            Self::Http
        }
    }

    /// String representation used in logs and storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Swarm => "swarm",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Governs which bucket a queued transfer waits in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// All priorities in admission scan order.
    pub const SCAN_ORDER: [Self; 3] = [Self::High, Self::Normal, Self::Low];

    /// Bucket index (0 = high).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown priority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority '{0}' (expected high, normal or low)")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(ParsePriorityError(other.to_string())),
        }
    }
}

/// Lifecycle status of a transfer.
///
/// ```text
/// Queued ──admit──▶ Downloading ──done──▶ Completed
///   ▲                 │  │  │
///   │   retry         │  │  └──error──▶ Failed
///   └─────────────────┘  └──pause──▶ Paused ──resume──▶ Queued
/// any non-terminal ──cancel──▶ Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Waiting in a priority bucket.
    Queued,
    /// Holding a concurrency slot; the backend is moving bytes.
    Downloading,
    /// Stopped by the caller; holds no slot.
    Paused,
    /// Finished successfully.
    Completed,
    /// Gave up after a permanent error or exhausted retries.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl TransferStatus {
    /// Convert to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => Self::Downloading,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            // "queued" or unknown values default to Queued
            _ => Self::Queued,
        }
    }

    /// Whether the status accepts no further transitions.
    ///
    /// `Failed` counts as final: retries go `Downloading → Queued` directly,
    /// so a record that reached `Failed` has been given up on.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
