//! Transfer registry.
//!
//! This module provides a pure state machine for the queue: the record table,
//! the priority buckets and the active set. No I/O is performed here; the
//! scheduler (`TransferQueue`) drives backends and emits events.
//!
//! # Design
//!
//! - Pure synchronous state machine (no async, no IO, no tracing)
//! - Every status change is appended to a transition log the caller drains
//! - Time is passed in, so retry scheduling is deterministic under test
//!
//! # Placement
//!
//! A record is in exactly one of: a priority bucket (`Queued`), the active
//! set (`Downloading`), or neither (`Paused` and the final statuses).

use std::time::Duration;

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tokio::time::Instant;

use ferry_core::{
    BackendHandle, Lease, Priority, QueueStats, TransferError, TransferId, TransferKind,
    TransferRecord, TransferStatus,
};

use crate::buckets::PriorityBuckets;
use crate::retry::{RetryDecision, RetryPolicy};

/// Caller errors from registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Transfer '{0}' already exists")]
    AlreadyExists(TransferId),

    #[error("Transfer '{0}' not found")]
    NotFound(TransferId),

    #[error("Cannot {action} transfer '{id}' while it is {status}")]
    IllegalTransition {
        id: TransferId,
        status: TransferStatus,
        action: &'static str,
    },
}

/// A status change recorded by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: TransferId,
    pub from: TransferStatus,
    pub to: TransferStatus,
    /// Error that caused the change, if any.
    pub error: Option<String>,
}

impl Transition {
    fn new(id: &TransferId, from: TransferStatus, to: TransferStatus) -> Self {
        Self {
            id: id.clone(),
            from,
            to,
            error: None,
        }
    }

    fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// One backend start of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attempt {
    lease: Lease,
    /// Set once the backend accepted the start.
    handle: Option<BackendHandle>,
}

#[derive(Debug)]
struct Entry {
    record: TransferRecord,
    /// Earliest instant a retried transfer may be admitted again.
    retry_at: Option<Instant>,
    attempt: Option<Attempt>,
}

impl Entry {
    const fn new(record: TransferRecord) -> Self {
        Self {
            record,
            retry_at: None,
            attempt: None,
        }
    }
}

/// A transfer the admission pass moved into the active set.
#[derive(Debug, Clone)]
pub struct Admitted {
    /// The record as it is now (status `Downloading`).
    pub record: TransferRecord,
    pub lease: Lease,
    /// Set when the transfer was paused mid-flight and its backend work can
    /// be resumed instead of started over.
    pub resume: Option<BackendHandle>,
}

/// Result of one admission pass.
#[derive(Debug, Default)]
pub struct AdmissionPass {
    pub admitted: Vec<Admitted>,
    /// Earliest instant a queued transfer waiting out a retry delay becomes
    /// eligible. Only tracked while slots are free.
    pub next_retry_at: Option<Instant>,
}

/// What happened to a terminal backend report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    Completed,
    /// Back in its bucket, eligible after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Pinned at `Failed`.
    Failed {
        error: TransferError,
        retries_exhausted: bool,
    },
    /// The transfer is paused; its backend work is gone and the next
    /// admission starts it fresh.
    Detached,
    /// The report belongs to a superseded attempt and was ignored.
    Stale,
}

/// How a persisted record re-entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// Back in its bucket, waiting for admission.
    Queued,
    /// Final status, kept for display.
    Kept,
}

/// The queue's record table, buckets and active set.
///
/// This is a sync type with no internal locking; the caller
/// (`TransferQueue`) is responsible for synchronization.
#[derive(Debug)]
pub struct TransferRegistry {
    entries: IndexMap<TransferId, Entry>,
    buckets: PriorityBuckets,
    active: IndexSet<TransferId>,
    max_concurrent: u32,
    policy: RetryPolicy,
    next_lease: u64,
    transitions: Vec<Transition>,
}

impl TransferRegistry {
    pub fn new(max_concurrent: u32, policy: RetryPolicy) -> Self {
        Self {
            entries: IndexMap::new(),
            buckets: PriorityBuckets::new(),
            active: IndexSet::new(),
            max_concurrent,
            policy,
            next_lease: 0,
            transitions: Vec::new(),
        }
    }

    pub const fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    /// Change the concurrency limit. Active transfers are never stopped.
    pub const fn set_max_concurrent(&mut self, max: u32) {
        self.max_concurrent = max;
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn get(&self, id: &TransferId) -> Option<&TransferRecord> {
        self.entries.get(id).map(|entry| &entry.record)
    }

    /// Copy of every record, in insertion order.
    pub fn records(&self) -> Vec<TransferRecord> {
        self.entries
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// When a queued transfer waiting out a retry delay becomes eligible.
    pub fn retry_at(&self, id: &TransferId) -> Option<Instant> {
        self.entries.get(id).and_then(|entry| entry.retry_at)
    }

    /// Drain the transitions recorded since the last call.
    pub fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    /// Add a new transfer to the tail of its bucket.
    ///
    /// The record is normalized to a fresh `Queued` transfer.
    pub fn insert(&mut self, mut record: TransferRecord) -> Result<(), QueueError> {
        if self.entries.contains_key(&record.id) {
            return Err(QueueError::AlreadyExists(record.id));
        }

        record.status = TransferStatus::Queued;
        record.retry_count = 0;
        record.last_error = None;
        record.started_at = None;
        record.completed_at = None;
        record.settle();

        self.buckets.push_back(record.id.clone(), record.priority);
        self.entries.insert(record.id.clone(), Entry::new(record));
        Ok(())
    }

    /// Re-admit a persisted record from a previous session.
    ///
    /// Every non-final record (`Queued`, `Paused` or an interrupted
    /// `Downloading`) goes back to its bucket as `Queued` and waits for
    /// admission; its backend work is gone, so it starts fresh. `retry_count`
    /// is preserved, capped at the current retry budget. Final records are
    /// kept as they are.
    pub fn restore(&mut self, mut record: TransferRecord) -> Result<Restored, QueueError> {
        if self.entries.contains_key(&record.id) {
            return Err(QueueError::AlreadyExists(record.id));
        }

        record.settle();
        record.retry_count = record.retry_count.min(self.policy.max_retries);
        let restored = match record.status {
            TransferStatus::Queued | TransferStatus::Downloading | TransferStatus::Paused => {
                record.status = TransferStatus::Queued;
                self.buckets.push_back(record.id.clone(), record.priority);
                Restored::Queued
            }
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled => {
                Restored::Kept
            }
        };

        self.entries.insert(record.id.clone(), Entry::new(record));
        Ok(restored)
    }

    /// Run admission control.
    ///
    /// Scans `High`, `Normal`, `Low` and starts eligible ids FIFO until the
    /// active set is full, then stops entirely. Ids still waiting out a retry
    /// delay are skipped and keep their bucket position.
    pub fn admit(&mut self, now: Instant) -> AdmissionPass {
        let mut pass = AdmissionPass::default();

        'scan: for priority in Priority::SCAN_ORDER {
            let mut pos = 0;
            while pos < self.buckets.bucket(priority).len() {
                if !self.has_free_slot() {
                    break 'scan;
                }

                let queued = &self.buckets.bucket(priority)[pos];
                let retry_at = self.entries.get(queued).and_then(|entry| entry.retry_at);
                if let Some(at) = retry_at.filter(|at| *at > now) {
                    pass.next_retry_at = Some(pass.next_retry_at.map_or(at, |cur| cur.min(at)));
                    pos += 1;
                    continue;
                }

                let Some(id) = self.buckets.take_at(priority, pos) else {
                    break;
                };
                if let Some(admitted) = self.start(id) {
                    pass.admitted.push(admitted);
                }
            }
        }

        pass
    }

    fn has_free_slot(&self) -> bool {
        self.active.len() < self.max_concurrent as usize
    }

    /// Move a dequeued id into the active set.
    fn start(&mut self, id: TransferId) -> Option<Admitted> {
        let entry = self.entries.get_mut(&id)?;
        let from = entry.record.status;

        entry.retry_at = None;
        entry.record.status = TransferStatus::Downloading;
        entry.record.started_at.get_or_insert_with(Utc::now);

        let (lease, resume) = match entry.attempt {
            Some(Attempt {
                lease,
                handle: Some(handle),
            }) => (lease, Some(handle)),
            _ => {
                self.next_lease += 1;
                let lease = Lease::new(self.next_lease);
                entry.attempt = Some(Attempt {
                    lease,
                    handle: None,
                });
                (lease, None)
            }
        };

        let record = entry.record.clone();
        self.transitions
            .push(Transition::new(&id, from, TransferStatus::Downloading));
        self.active.insert(id);

        Some(Admitted {
            record,
            lease,
            resume,
        })
    }

    /// Remember the handle a backend returned for `lease`.
    ///
    /// Returns `false` if the attempt was superseded in the meantime.
    pub fn bind_handle(&mut self, id: &TransferId, lease: Lease, handle: BackendHandle) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.record.status != TransferStatus::Downloading {
            return false;
        }
        match entry.attempt.as_mut() {
            Some(attempt) if attempt.lease == lease => {
                attempt.handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Whether `lease` is the running attempt of `id`.
    pub fn is_current(&self, id: &TransferId, lease: Lease) -> bool {
        self.entries.get(id).is_some_and(|entry| {
            entry.record.status == TransferStatus::Downloading
                && entry.attempt.is_some_and(|attempt| attempt.lease == lease)
        })
    }

    /// Apply a progress sample from the running attempt.
    ///
    /// Returns `false` (and changes nothing) for stale leases.
    pub fn apply_progress(
        &mut self,
        id: &TransferId,
        lease: Lease,
        downloaded: u64,
        total: Option<u64>,
        speed_bps: f64,
    ) -> bool {
        if !self.is_current(id, lease) {
            return false;
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.record.apply_progress(downloaded, total, speed_bps);
        }
        true
    }

    /// `Downloading → Paused`. Frees the slot immediately.
    ///
    /// Returns the backend handle to pause, if the backend accepted a start.
    pub fn pause(&mut self, id: &TransferId) -> Result<Option<BackendHandle>, QueueError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        let status = entry.record.status;
        if status != TransferStatus::Downloading {
            return Err(QueueError::IllegalTransition {
                id: id.clone(),
                status,
                action: "pause",
            });
        }

        entry.record.status = TransferStatus::Paused;
        entry.record.settle();
        let handle = entry.attempt.and_then(|attempt| attempt.handle);

        self.active.shift_remove(id);
        self.transitions.push(Transition::new(
            id,
            TransferStatus::Downloading,
            TransferStatus::Paused,
        ));
        Ok(handle)
    }

    /// `Paused → Queued`, at the tail of its bucket.
    pub fn resume(&mut self, id: &TransferId) -> Result<(), QueueError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        let status = entry.record.status;
        if status != TransferStatus::Paused {
            return Err(QueueError::IllegalTransition {
                id: id.clone(),
                status,
                action: "resume",
            });
        }

        entry.record.status = TransferStatus::Queued;
        entry.retry_at = None;
        self.buckets.push_back(id.clone(), entry.record.priority);
        self.transitions.push(Transition::new(
            id,
            TransferStatus::Paused,
            TransferStatus::Queued,
        ));
        Ok(())
    }

    /// Any non-final status `→ Cancelled`.
    ///
    /// Returns the backend handle to cancel, if one is held.
    pub fn cancel(&mut self, id: &TransferId) -> Result<Option<BackendHandle>, QueueError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        let from = entry.record.status;
        if from.is_terminal() {
            return Err(QueueError::IllegalTransition {
                id: id.clone(),
                status: from,
                action: "cancel",
            });
        }

        entry.record.status = TransferStatus::Cancelled;
        entry.record.settle();
        entry.retry_at = None;
        let handle = entry.attempt.take().and_then(|attempt| attempt.handle);

        match from {
            TransferStatus::Queued => {
                self.buckets.remove(id);
            }
            TransferStatus::Downloading => {
                self.active.shift_remove(id);
            }
            _ => {}
        }

        self.transitions
            .push(Transition::new(id, from, TransferStatus::Cancelled));
        Ok(handle)
    }

    /// Change a transfer's priority.
    ///
    /// A queued id moves to the tail of its new bucket. A paused transfer
    /// only has its field updated. Running and final transfers are refused.
    pub fn set_priority(&mut self, id: &TransferId, priority: Priority) -> Result<(), QueueError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        match entry.record.status {
            TransferStatus::Queued => {
                if entry.record.priority != priority {
                    entry.record.priority = priority;
                    self.buckets.remove(id);
                    self.buckets.push_back(id.clone(), priority);
                }
                Ok(())
            }
            TransferStatus::Paused => {
                entry.record.priority = priority;
                Ok(())
            }
            status => Err(QueueError::IllegalTransition {
                id: id.clone(),
                status,
                action: "reprioritize",
            }),
        }
    }

    /// Handle a terminal backend report (`done` or an error).
    ///
    /// Errors go through the retry policy: transient errors with budget left
    /// put the transfer back in its original bucket; everything else pins it
    /// at `Failed`.
    pub fn finish(
        &mut self,
        id: &TransferId,
        lease: Lease,
        result: Result<(), TransferError>,
        now: Instant,
    ) -> Finish {
        let policy = self.policy;
        let Some(entry) = self.entries.get_mut(id) else {
            return Finish::Stale;
        };
        if !matches!(entry.attempt, Some(attempt) if attempt.lease == lease) {
            return Finish::Stale;
        }

        match entry.record.status {
            TransferStatus::Downloading => {}
            TransferStatus::Paused => {
                entry.attempt = None;
                return Finish::Detached;
            }
            _ => return Finish::Stale,
        }

        entry.attempt = None;
        entry.record.settle();
        self.active.shift_remove(id);

        let error = match result {
            Ok(()) => {
                let record = &mut entry.record;
                record.status = TransferStatus::Completed;
                record.completed_at = Some(Utc::now());
                record.progress = 1.0;
                if let Some(total) = record.total_bytes {
                    record.downloaded_bytes = total;
                }
                record.last_error = None;

                self.transitions.push(Transition::new(
                    id,
                    TransferStatus::Downloading,
                    TransferStatus::Completed,
                ));
                return Finish::Completed;
            }
            Err(error) => error,
        };

        let message = error.to_string();
        entry.record.last_error = Some(message.clone());

        match policy.decide(entry.record.retry_count, &error) {
            RetryDecision::RetryAfter { attempt, delay } => {
                entry.record.retry_count = attempt;
                entry.record.status = TransferStatus::Queued;
                entry.retry_at = Some(now + delay);
                self.buckets.push_back(id.clone(), entry.record.priority);

                self.transitions.push(
                    Transition::new(id, TransferStatus::Downloading, TransferStatus::Queued)
                        .with_error(message),
                );
                Finish::Retrying { attempt, delay }
            }
            decision => {
                entry.record.status = TransferStatus::Failed;

                self.transitions.push(
                    Transition::new(id, TransferStatus::Downloading, TransferStatus::Failed)
                        .with_error(message),
                );
                Finish::Failed {
                    error,
                    retries_exhausted: decision == RetryDecision::Exhausted,
                }
            }
        }
    }

    /// Delete a record in any status.
    ///
    /// Returns the removed record and any backend handle it still held.
    pub fn remove(
        &mut self,
        id: &TransferId,
    ) -> Result<(TransferRecord, Option<BackendHandle>), QueueError> {
        let entry = self
            .entries
            .shift_remove(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        match entry.record.status {
            TransferStatus::Queued => {
                self.buckets.remove(id);
            }
            TransferStatus::Downloading => {
                self.active.shift_remove(id);
            }
            _ => {}
        }

        let handle = entry.attempt.and_then(|attempt| attempt.handle);
        Ok((entry.record, handle))
    }

    /// Delete every `Completed` record. Returns the removed ids.
    pub fn clear_completed(&mut self) -> Vec<TransferId> {
        let mut removed = Vec::new();
        self.entries.retain(|id, entry| {
            if entry.record.status == TransferStatus::Completed {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Handles of every transfer whose backend work is running.
    pub fn active_handles(&self) -> Vec<(TransferId, TransferKind, BackendHandle)> {
        self.active
            .iter()
            .filter_map(|id| {
                let entry = self.entries.get(id)?;
                let handle = entry.attempt?.handle?;
                Some((id.clone(), entry.record.kind, handle))
            })
            .collect()
    }

    /// Count records per status.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            max_concurrent: self.max_concurrent,
            ..QueueStats::default()
        };
        for entry in self.entries.values() {
            match entry.record.status {
                TransferStatus::Queued => stats.queued += 1,
                TransferStatus::Downloading => stats.active += 1,
                TransferStatus::Paused => stats.paused += 1,
                TransferStatus::Completed => stats.completed += 1,
                TransferStatus::Failed => stats.failed += 1,
                TransferStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
