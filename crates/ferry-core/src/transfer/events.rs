//! Transfer events and snapshot DTOs.
//!
//! These types are "UI safe": `Clone + Debug + Serialize + Deserialize` with
//! no infrastructure dependencies, so adapters can forward them over IPC as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::TransferRecord;
use super::types::{Priority, TransferId, TransferStatus};

/// Counts of transfers per status, plus the current concurrency budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u32,
    pub active: u32,
    pub paused: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub max_concurrent: u32,
}

impl QueueStats {
    /// Nothing waiting and nothing running.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.queued == 0 && self.active == 0
    }

    /// Total number of records counted.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.queued + self.active + self.paused + self.completed + self.failed + self.cancelled
    }
}

/// Full point-in-time view of every transfer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Every record, in insertion order.
    pub transfers: Vec<TransferRecord>,
    pub stats: QueueStats,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Get a record by id.
    pub fn get(&self, id: &TransferId) -> Option<&TransferRecord> {
        self.transfers.iter().find(|r| &r.id == id)
    }

    /// Whether every record has reached a final status.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.transfers.iter().all(TransferRecord::is_terminal)
    }
}

/// Outcome counts for one busy → idle period of the queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    /// When the queue went from idle to busy.
    pub started_at: DateTime<Utc>,
    /// When it became idle again.
    pub drained_at: DateTime<Utc>,
}

/// Single discriminated union for everything the queue broadcasts.
///
/// ```typescript
/// type TransferEvent =
///   | { type: "snapshot"; snapshot: QueueSnapshot }
///   | { type: "added"; id: string; priority: Priority }
///   | { type: "status_changed"; id: string; from: Status; to: Status; error?: string }
///   | { type: "removed"; id: string }
///   | { type: "queue_drained"; summary: DrainSummary };
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Full state of every transfer.
    Snapshot { snapshot: QueueSnapshot },

    /// A transfer was accepted into the queue.
    Added { id: TransferId, priority: Priority },

    /// A transfer changed status.
    StatusChanged {
        id: TransferId,
        from: TransferStatus,
        to: TransferStatus,
        /// Backend error that caused the change, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A record was deleted by the caller.
    Removed { id: TransferId },

    /// The queue finished all outstanding work.
    QueueDrained { summary: DrainSummary },
}

impl TransferEvent {
    /// Create a status change event without an error.
    pub fn status_changed(id: TransferId, from: TransferStatus, to: TransferStatus) -> Self {
        Self::StatusChanged {
            id,
            from,
            to,
            error: None,
        }
    }

    /// The transfer this event is about, if it concerns a single transfer.
    #[must_use]
    pub const fn transfer_id(&self) -> Option<&TransferId> {
        match self {
            Self::Added { id, .. } | Self::StatusChanged { id, .. } | Self::Removed { id } => {
                Some(id)
            }
            Self::Snapshot { .. } | Self::QueueDrained { .. } => None,
        }
    }

    /// Whether this event reports a state transition.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::StatusChanged { .. })
    }
}
