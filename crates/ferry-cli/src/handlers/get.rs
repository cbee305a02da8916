//! Get command handler.
//!
//! Queues every locator, renders progress until each transfer is final (or
//! the user interrupts) and reports the outcome.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use ferry_core::{QueueSnapshot, TransferBackend, TransferEvent, TransferRecord, TransferStatus};
use ferry_queue::{TransferQueue, TransferQueueDeps, build_transfer_queue};

use crate::commands::GetArgs;
use crate::error::CliError;
use crate::http_backend::HttpBackend;
use crate::presentation::TransferProgress;
use crate::store::JsonFileStore;

/// How often the queue is polled when no events arrive.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of a `ferry get` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GetReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Transfers still queued, paused or running when the run stopped.
    pub unfinished: usize,
    /// `(label, error)` for every failed transfer.
    pub failures: Vec<(String, String)>,
}

impl GetReport {
    fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        let mut report = Self::default();
        for record in &snapshot.transfers {
            match record.status {
                TransferStatus::Completed => report.completed += 1,
                TransferStatus::Cancelled => report.cancelled += 1,
                TransferStatus::Failed => {
                    report.failed += 1;
                    report.failures.push((
                        record.locator.clone(),
                        record
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                TransferStatus::Queued | TransferStatus::Downloading | TransferStatus::Paused => {
                    report.unfinished += 1;
                }
            }
        }
        report
    }

    /// Whether every transfer completed.
    pub const fn success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && self.unfinished == 0
    }

    /// Write a human readable summary.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn print_summary(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "Downloaded {} file(s)", self.completed)?;
        if self.failed > 0 {
            writeln!(out, "{} failed:", self.failed)?;
            for (locator, error) in &self.failures {
                writeln!(out, "  {locator}: {error}")?;
            }
        }
        if self.cancelled > 0 {
            writeln!(out, "{} cancelled", self.cancelled)?;
        }
        if self.unfinished > 0 {
            writeln!(out, "{} unfinished", self.unfinished)?;
        }
        Ok(())
    }
}

/// Execute the get command with the HTTP backend.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built, the configuration
/// is invalid, or the state file cannot be read.
pub async fn execute(args: &GetArgs) -> Result<GetReport, CliError> {
    let backend = HttpBackend::new().map_err(|e| CliError::Http(e.to_string()))?;
    run(args, Arc::new(backend)).await
}

/// Execute the get command against a given backend.
///
/// # Errors
///
/// See [`execute`].
pub async fn run(args: &GetArgs, backend: Arc<dyn TransferBackend>) -> Result<GetReport, CliError> {
    let mut deps = TransferQueueDeps::new(args.queue_config()).with_backend(backend);
    if let Some(state) = &args.state {
        deps = deps.with_store(Arc::new(JsonFileStore::new(state)));
    }
    let queue = build_transfer_queue(deps)?;
    let mut events = queue.subscribe();

    if args.state.is_some() {
        let restored = queue.restore().await?;
        debug!(target: "ferry", restored, "Loaded saved downloads");
    }
    enqueue_locators(&queue, args).await?;

    let mut progress = TransferProgress::new();
    let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
    let final_snapshot = loop {
        let snapshot = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: "ferry", "Interrupted, pausing downloads");
                break queue.snapshot().await;
            }
            event = events.recv() => match event {
                Ok(TransferEvent::Snapshot { snapshot }) => snapshot,
                Ok(_) | Err(RecvError::Lagged(_)) => queue.snapshot().await,
                Err(RecvError::Closed) => break queue.snapshot().await,
            },
            _ = idle_check.tick() => queue.snapshot().await,
        };

        progress.render(&snapshot);
        if snapshot.all_terminal() {
            break queue.snapshot().await;
        }
    };
    progress.finish();

    let report = GetReport::from_snapshot(&final_snapshot);
    forget_finished(&queue, &final_snapshot).await;
    queue.shutdown().await;
    Ok(report)
}

async fn enqueue_locators(queue: &TransferQueue, args: &GetArgs) -> Result<(), CliError> {
    if args.locators.len() > 1 {
        create_dest_dir(&args.dest)?;
    }

    let pending = queue.get_all().await;
    for locator in &args.locators {
        if already_pending(&pending, locator) {
            info!(target: "ferry", %locator, "Already queued from saved state");
            continue;
        }
        let record =
            TransferRecord::from_locator(locator.clone(), &args.dest).with_priority(args.priority);
        queue.enqueue(record).await;
    }
    Ok(())
}

fn already_pending(records: &[TransferRecord], locator: &str) -> bool {
    records
        .iter()
        .any(|record| record.locator == locator && !record.is_terminal())
}

fn create_dest_dir(dest: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(dest).map_err(|e| {
        CliError::Arguments(format!(
            "cannot use '{}' as a download directory: {e}",
            dest.display()
        ))
    })
}

/// Drop final records so only unfinished work is saved.
async fn forget_finished(queue: &TransferQueue, snapshot: &QueueSnapshot) {
    let cleared = queue.clear_completed().await;
    let mut removed = 0;
    for record in snapshot
        .transfers
        .iter()
        .filter(|record| matches!(record.status, TransferStatus::Failed | TransferStatus::Cancelled))
    {
        if queue.remove(&record.id).await {
            removed += 1;
        } else {
            warn!(target: "ferry", id = %record.id, "Finished transfer already gone");
        }
    }
    debug!(target: "ferry", cleared, removed, "Dropped finished transfers");
}
