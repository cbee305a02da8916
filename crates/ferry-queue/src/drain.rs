//! Queue run tracking (busy → drained transitions).

use chrono::{DateTime, Utc};

use ferry_core::{DrainSummary, QueueStats, TransferStatus};

use crate::registry::Transition;

/// Outcome counts for the current busy period.
#[derive(Debug, Clone)]
struct QueueRun {
    started_at: DateTime<Utc>,
    completed: u32,
    failed: u32,
    cancelled: u32,
}

impl QueueRun {
    const fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            completed: 0,
            failed: 0,
            cancelled: 0,
        }
    }

    const fn record(&mut self, to: TransferStatus) {
        match to {
            TransferStatus::Completed => self.completed += 1,
            TransferStatus::Failed => self.failed += 1,
            TransferStatus::Cancelled => self.cancelled += 1,
            TransferStatus::Queued | TransferStatus::Downloading | TransferStatus::Paused => {}
        }
    }
}

/// Watches transitions and stats to find when the queue drains.
///
/// A run starts when the queue has work (or something was admitted) and
/// ends the first time nothing is queued or running afterwards.
#[derive(Debug, Default)]
pub struct DrainTracker {
    current: Option<QueueRun>,
}

impl DrainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub const fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// Observe one critical section's transitions and the stats after it.
    ///
    /// Returns a summary when this section drained the queue.
    pub fn observe(
        &mut self,
        transitions: &[Transition],
        stats: &QueueStats,
        now: DateTime<Utc>,
    ) -> Option<DrainSummary> {
        let admitted = transitions
            .iter()
            .any(|t| t.to == TransferStatus::Downloading);
        if self.current.is_none() && (admitted || !stats.is_idle()) {
            self.current = Some(QueueRun::new(now));
        }

        let run = self.current.as_mut()?;
        for transition in transitions {
            run.record(transition.to);
        }

        if !stats.is_idle() {
            return None;
        }

        self.current.take().map(|run| DrainSummary {
            completed: run.completed,
            failed: run.failed,
            cancelled: run.cancelled,
            started_at: run.started_at,
            drained_at: now,
        })
    }
}
