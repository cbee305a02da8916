//! Transfer backend port.
//!
//! A backend moves the bytes for one [`TransferKind`]. The queue calls
//! `start` when a transfer is admitted and afterwards talks to the running
//! work only through the returned [`BackendHandle`].
//!
//! Backends report back through a [`ProgressReporter`] instead of callbacks.
//! Every report lands on the scheduler's channel tagged with the transfer id
//! and the [`Lease`] minted for that start, so the scheduler processes them
//! in arrival order and can drop reports from superseded attempts.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::transfer::{TransferError, TransferId, TransferKind, TransferRecord};

/// Identifies one backend start of a transfer.
///
/// Minted by the scheduler on every `start`. A paused transfer keeps its
/// lease so a later `resume` on the same handle is still recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease(u64);

impl Lease {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Opaque token a backend hands out for running work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(u64);

impl BackendHandle {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Progress sample reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Bytes moved so far (for this transfer, not this session).
    pub downloaded: u64,
    /// Total bytes, when known.
    pub total: Option<u64>,
    /// Backend-measured rate. When absent the scheduler derives one.
    pub speed_bps: Option<f64>,
}

impl ProgressUpdate {
    #[must_use]
    pub const fn new(downloaded: u64, total: Option<u64>) -> Self {
        Self {
            downloaded,
            total,
            speed_bps: None,
        }
    }

    /// Attach a backend-measured speed.
    #[must_use]
    pub const fn with_speed(mut self, speed_bps: f64) -> Self {
        self.speed_bps = Some(speed_bps);
        self
    }
}

/// What a backend can report about a running transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReport {
    Progress(ProgressUpdate),
    /// The transfer finished successfully.
    Done,
    /// The transfer stopped with an error.
    Failed(TransferError),
}

/// A report addressed to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSignal {
    pub id: TransferId,
    pub lease: Lease,
    pub report: BackendReport,
}

/// Sending half handed to a backend on `start`.
///
/// Cheap to clone; all methods are non-blocking. Each method returns `false`
/// once the scheduler has shut down.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    id: TransferId,
    lease: Lease,
    tx: mpsc::UnboundedSender<BackendSignal>,
}

impl ProgressReporter {
    pub fn new(id: TransferId, lease: Lease, tx: mpsc::UnboundedSender<BackendSignal>) -> Self {
        Self { id, lease, tx }
    }

    /// The transfer this reporter belongs to.
    #[must_use]
    pub const fn id(&self) -> &TransferId {
        &self.id
    }

    #[must_use]
    pub const fn lease(&self) -> Lease {
        self.lease
    }

    /// Report bytes moved.
    pub fn progress(&self, update: ProgressUpdate) -> bool {
        self.send(BackendReport::Progress(update))
    }

    /// Report successful completion.
    pub fn done(&self) -> bool {
        self.send(BackendReport::Done)
    }

    /// Report a failure.
    pub fn failed(&self, error: TransferError) -> bool {
        self.send(BackendReport::Failed(error))
    }

    fn send(&self, report: BackendReport) -> bool {
        self.tx
            .send(BackendSignal {
                id: self.id.clone(),
                lease: self.lease,
                report,
            })
            .is_ok()
    }
}

/// Port for a transfer backend.
///
/// # Contract
///
/// - `start` must return promptly; the actual I/O runs in the backend's own
///   task/thread and reports through the reporter.
/// - `pause`, `resume` and `cancel` must be safe to call after the I/O has
///   already finished, and must not block on teardown.
/// - After `cancel` the backend should release resources; any further
///   reports it sends are ignored.
pub trait TransferBackend: Send + Sync {
    /// The transfer kind this backend serves.
    fn kind(&self) -> TransferKind;

    /// Begin moving bytes for `record`.
    fn start(
        &self,
        record: &TransferRecord,
        reporter: ProgressReporter,
    ) -> Result<BackendHandle, TransferError>;

    /// Stop moving bytes, keeping partial data.
    fn pause(&self, handle: BackendHandle);

    /// Continue a paused transfer, reporting through the original reporter.
    fn resume(&self, handle: BackendHandle);

    /// Abort and release resources.
    fn cancel(&self, handle: BackendHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_tags_signals_with_id_and_lease() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(TransferId::new("t1"), Lease::new(7), tx);

        assert!(reporter.progress(ProgressUpdate::new(10, Some(100))));
        assert!(reporter.done());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.id.as_str(), "t1");
        assert_eq!(first.lease, Lease::new(7));
        assert_eq!(
            first.report,
            BackendReport::Progress(ProgressUpdate::new(10, Some(100)))
        );
        assert_eq!(rx.try_recv().unwrap().report, BackendReport::Done);
    }

    #[test]
    fn reporter_notices_closed_scheduler() {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(TransferId::new("t1"), Lease::new(1), tx);
        drop(rx);
        assert!(!reporter.failed(TransferError::timeout("late")));
    }
}
