//! The transfer record: identity, configuration and live status of one transfer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Priority, TransferId, TransferKind, TransferStatus};

/// One transfer tracked by the queue.
///
/// Live fields (`progress`, `speed_bps`, `downloaded_bytes`, `total_bytes`,
/// `eta_seconds`) change only while the transfer is `Downloading`.
/// `metadata` is carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Stable identity.
    pub id: TransferId,
    /// Backend family that handles this transfer.
    pub kind: TransferKind,
    /// URL or swarm identifier. Opaque to the queue.
    pub locator: String,
    /// Target directory or file.
    pub destination: PathBuf,
    /// Current scheduling priority.
    pub priority: Priority,
    /// Current lifecycle status.
    pub status: TransferStatus,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    /// Current transfer rate in bytes per second.
    pub speed_bps: f64,
    /// Bytes moved so far.
    pub downloaded_bytes: u64,
    /// Total size, when the backend knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Estimated seconds remaining, when computable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// Automatic retries consumed so far.
    pub retry_count: u32,
    /// Most recent backend error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Caller-defined payload.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TransferRecord {
    /// Create a new queued record.
    pub fn new(
        id: impl Into<TransferId>,
        kind: TransferKind,
        locator: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            locator: locator.into(),
            destination: destination.into(),
            priority: Priority::Normal,
            status: TransferStatus::Queued,
            progress: 0.0,
            speed_bps: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            eta_seconds: None,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a record with a generated id, inferring the kind from the locator.
    pub fn from_locator(locator: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        let locator = locator.into();
        let kind = TransferKind::infer(&locator);
        Self::new(TransferId::generate(), kind, locator, destination)
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach caller metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Apply a progress sample.
    ///
    /// `speed_bps` is the (already smoothed) rate; ETA is derived from it
    /// when the total size is known.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply_progress(&mut self, downloaded: u64, total: Option<u64>, speed_bps: f64) {
        self.downloaded_bytes = downloaded;
        if total.is_some() {
            self.total_bytes = total;
        }
        self.speed_bps = speed_bps.max(0.0);

        match self.total_bytes {
            Some(total) if total > 0 => {
                self.progress = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
                let remaining = total.saturating_sub(downloaded);
                self.eta_seconds = if self.speed_bps > 0.0 {
                    Some(remaining as f64 / self.speed_bps)
                } else {
                    None
                };
            }
            _ => {
                self.eta_seconds = None;
            }
        }
    }

    /// Clear rate fields when the transfer stops moving bytes.
    pub const fn settle(&mut self) {
        self.speed_bps = 0.0;
        self.eta_seconds = None;
    }

    /// Whether this record can still change state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
