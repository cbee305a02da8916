//! Transfer queue scheduler.
//!
//! This module provides [`TransferQueue`], the single scheduling authority
//! that owns the registry, drives backends and broadcasts status.
//!
//! # Architecture
//!
//! - **Registry**: pure state machine (buckets, active set, records)
//! - **Scheduler loop**: long-lived task that processes backend reports,
//!   snapshot ticks and retry wake-ups
//! - **Persister**: background task that saves the latest state, coalescing
//!   bursts of changes into one write
//!
//! # Concurrency Model
//!
//! - One `RwLock` around all scheduler state; every mutation takes the write
//!   lock, reads take the read lock
//! - Caller operations mutate under the lock and return without awaiting I/O
//! - Backends report through an unbounded channel, processed in arrival order
//! - Lease tokens drop reports from superseded attempts
//! - Backend calls, events and the completion notifier run inside the
//!   critical section, so they must not block

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock, broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use ferry_core::{
    BackendReport, BackendSignal, CompletionNotifierPort, ConfigError, Lease, NoopNotifier,
    NoopTransferEmitter, NoopTransferStore, Priority, ProgressReporter, QueueConfig,
    QueueSnapshot, QueueStats, StoreError, TransferBackend, TransferError, TransferEvent,
    TransferEventEmitterPort, TransferId, TransferKind, TransferRecord, TransferStatus,
    TransferStorePort, validate_config,
};

use crate::broadcaster::{StatusBroadcaster, Subscription};
use crate::drain::DrainTracker;
use crate::progress::{SnapshotThrottle, SpeedTracker};
use crate::registry::{Admitted, Finish, QueueError, TransferRegistry};
use crate::retry::RetryPolicy;

/// Dependencies for creating a transfer queue.
///
/// This struct bundles all the ports and configuration needed to construct
/// a [`TransferQueue`]. Unset ports default to no-op implementations.
pub struct TransferQueueDeps {
    /// One backend per transfer kind. A later entry replaces an earlier one
    /// for the same kind.
    pub backends: Vec<Arc<dyn TransferBackend>>,
    /// Port for persisting the queue.
    pub store: Arc<dyn TransferStorePort>,
    /// Port called once per completed transfer.
    pub notifier: Arc<dyn CompletionNotifierPort>,
    /// Port for pushing events to an external consumer.
    pub event_emitter: Arc<dyn TransferEventEmitterPort>,
    pub config: QueueConfig,
}

impl TransferQueueDeps {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            backends: Vec::new(),
            store: Arc::new(NoopTransferStore),
            notifier: Arc::new(NoopNotifier),
            event_emitter: Arc::new(NoopTransferEmitter::new()),
            config,
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TransferStorePort>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifierPort>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_event_emitter(mut self, emitter: Arc<dyn TransferEventEmitterPort>) -> Self {
        self.event_emitter = emitter;
        self
    }
}

/// Build a transfer queue from its dependencies and start its runner.
///
/// Must be called from within a tokio runtime.
pub fn build_transfer_queue(deps: TransferQueueDeps) -> Result<Arc<TransferQueue>, ConfigError> {
    let queue = Arc::new(TransferQueue::new(deps)?);
    queue.ensure_runner();
    Ok(queue)
}

/// Everything guarded by the scheduler lock.
struct SchedulerState {
    registry: TransferRegistry,
    speeds: HashMap<TransferId, SpeedTracker>,
    throttle: SnapshotThrottle,
    drain: DrainTracker,
    /// Earliest instant a retrying transfer becomes eligible.
    next_retry_at: Option<Instant>,
    closed: bool,
}

/// The transfer queue.
pub struct TransferQueue {
    state: RwLock<SchedulerState>,
    backends: HashMap<TransferKind, Arc<dyn TransferBackend>>,
    store: Arc<dyn TransferStorePort>,
    notifier: Arc<dyn CompletionNotifierPort>,
    broadcaster: StatusBroadcaster,
    /// Cloned into every reporter handed to a backend.
    signal_tx: mpsc::UnboundedSender<BackendSignal>,
    /// Taken by the runner when it starts.
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<BackendSignal>>>,
    /// Wakes the runner when the retry schedule changes.
    retry_notify: Notify,
    /// Save generation; bumped whenever the persisted view changed.
    save_tx: watch::Sender<u64>,
    /// Serializes store writes so the final save is never overtaken.
    persist_lock: Mutex<()>,
    shutdown: CancellationToken,
    runner_started: AtomicBool,
    broadcast_interval: Duration,
}

impl TransferQueue {
    /// Create a queue without starting its runner.
    ///
    /// Prefer [`build_transfer_queue`]; a queue whose runner never starts
    /// accepts operations but never processes backend reports.
    pub fn new(deps: TransferQueueDeps) -> Result<Self, ConfigError> {
        validate_config(&deps.config)?;
        let config = deps.config;

        let backends = deps
            .backends
            .into_iter()
            .map(|backend| (backend.kind(), backend))
            .collect();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (save_tx, _) = watch::channel(0);

        let state = SchedulerState {
            registry: TransferRegistry::new(
                config.max_concurrent,
                RetryPolicy::from_config(&config),
            ),
            speeds: HashMap::new(),
            throttle: SnapshotThrottle::new(config.broadcast_interval),
            drain: DrainTracker::new(),
            next_retry_at: None,
            closed: false,
        };

        Ok(Self {
            state: RwLock::new(state),
            backends,
            store: deps.store,
            notifier: deps.notifier,
            broadcaster: StatusBroadcaster::new(config.event_capacity, deps.event_emitter),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            retry_notify: Notify::new(),
            save_tx,
            persist_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            runner_started: AtomicBool::new(false),
            broadcast_interval: config.broadcast_interval,
        })
    }

    /// Ensure the runner and persister are started.
    ///
    /// This method is idempotent: calling it multiple times has no effect
    /// after the first call. The runner lives until [`TransferQueue::shutdown`].
    pub fn ensure_runner(self: &Arc<Self>) {
        if self
            .runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_loop().await;
            });

            // Subscribe before returning so no save request is missed.
            let save_rx = self.save_tx.subscribe();
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_persister(save_rx).await;
            });
        }
    }

    // =========================================================================
    // Caller operations
    // =========================================================================

    /// Add a transfer. Returns `false` if the id already exists (in any
    /// status) or the queue is shut down.
    pub async fn enqueue(&self, record: TransferRecord) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            warn!(target: "ferry.queue", id = %record.id, "Enqueue after shutdown ignored");
            return false;
        }

        let id = record.id.clone();
        let kind = record.kind;
        let priority = record.priority;
        if let Err(error) = state.registry.insert(record) {
            debug!(target: "ferry.queue", %error, "Enqueue rejected");
            return false;
        }

        info!(target: "ferry.queue", id = %id, kind = %kind, priority = %priority, "Transfer queued");
        self.broadcaster
            .publish(TransferEvent::Added { id, priority });
        self.admit(state, Instant::now());
        self.settle(state, true);
        true
    }

    /// `Downloading → Paused`. The slot is freed immediately and the backend
    /// is told to stop, keeping partial data.
    pub async fn pause(&self, id: &TransferId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        match state.registry.pause(id) {
            Ok(handle) => {
                if let Some(handle) = handle {
                    if let Some(backend) = self.backend_of(state, id) {
                        backend.pause(handle);
                    }
                }
                info!(target: "ferry.queue", id = %id, "Transfer paused");
                self.admit(state, Instant::now());
                self.settle(state, false);
                true
            }
            Err(error) => Self::rejected("pause", &error),
        }
    }

    /// `Paused → Queued`, at the tail of its priority bucket.
    pub async fn resume(&self, id: &TransferId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        match state.registry.resume(id) {
            Ok(()) => {
                info!(target: "ferry.queue", id = %id, "Transfer resumed");
                self.admit(state, Instant::now());
                self.settle(state, false);
                true
            }
            Err(error) => Self::rejected("resume", &error),
        }
    }

    /// Cancel any transfer that has not reached a final status.
    ///
    /// A second call for the same id returns `false`.
    pub async fn cancel(&self, id: &TransferId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        match state.registry.cancel(id) {
            Ok(handle) => {
                if let Some(handle) = handle {
                    if let Some(backend) = self.backend_of(state, id) {
                        backend.cancel(handle);
                    }
                }
                info!(target: "ferry.queue", id = %id, "Transfer cancelled");
                self.admit(state, Instant::now());
                self.settle(state, false);
                true
            }
            Err(error) => Self::rejected("cancel", &error),
        }
    }

    /// Delete a record in any status, cancelling its backend work if needed.
    pub async fn remove(&self, id: &TransferId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        match state.registry.remove(id) {
            Ok((record, handle)) => {
                if let Some(handle) = handle {
                    if let Some(backend) = self.backends.get(&record.kind) {
                        backend.cancel(handle);
                    }
                }
                info!(target: "ferry.queue", id = %id, status = %record.status, "Transfer removed");
                self.broadcaster
                    .publish(TransferEvent::Removed { id: id.clone() });
                self.admit(state, Instant::now());
                self.settle(state, true);
                true
            }
            Err(error) => Self::rejected("remove", &error),
        }
    }

    /// Change a queued or paused transfer's priority.
    ///
    /// Returns `false` for running and final transfers.
    pub async fn set_priority(&self, id: &TransferId, priority: Priority) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        match state.registry.set_priority(id, priority) {
            Ok(()) => {
                info!(target: "ferry.queue", id = %id, priority = %priority, "Transfer reprioritized");
                self.admit(state, Instant::now());
                self.settle(state, true);
                true
            }
            Err(error) => Self::rejected("set_priority", &error),
        }
    }

    /// Change the concurrency limit.
    ///
    /// Raising it admits more transfers right away. Lowering it never stops
    /// running transfers; the active set shrinks as they finish.
    pub async fn update_concurrency(&self, max_concurrent: u32) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return;
        }

        let previous = state.registry.max_concurrent();
        state.registry.set_max_concurrent(max_concurrent);
        info!(target: "ferry.queue", previous, max_concurrent, "Concurrency updated");
        self.admit(state, Instant::now());
        self.settle(state, true);
    }

    /// Delete every `Completed` record. Returns how many were removed.
    pub async fn clear_completed(&self) -> usize {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let removed = state.registry.clear_completed();
        if removed.is_empty() {
            return 0;
        }

        info!(target: "ferry.queue", count = removed.len(), "Cleared completed transfers");
        let count = removed.len();
        for id in removed {
            self.broadcaster.publish(TransferEvent::Removed { id });
        }
        self.settle(state, true);
        count
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every record, in insertion order.
    pub async fn get_all(&self) -> Vec<TransferRecord> {
        self.state.read().await.registry.records()
    }

    pub async fn get_by_id(&self, id: &TransferId) -> Option<TransferRecord> {
        self.state.read().await.registry.get(id).cloned()
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.read().await.registry.stats()
    }

    /// Full point-in-time view, the same shape subscribers receive.
    pub async fn snapshot(&self) -> QueueSnapshot {
        Self::snapshot_of(&self.state.read().await.registry)
    }

    /// Subscribe to transfer events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.broadcaster.subscribe()
    }

    /// Deliver events to `callback` until the subscription is dropped.
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription
    where
        F: Fn(TransferEvent) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe_with(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    // =========================================================================
    // Persistence & lifecycle
    // =========================================================================

    /// Load records saved by a previous session.
    ///
    /// Returns how many records were restored. Records whose id is already
    /// present are skipped.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let records = self.store.load().await?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let mut restored = 0;
        for record in records {
            let id = record.id.clone();
            match state.registry.restore(record) {
                Ok(placement) => {
                    restored += 1;
                    debug!(target: "ferry.queue", id = %id, ?placement, "Restored transfer");
                }
                Err(error) => {
                    warn!(target: "ferry.queue", %error, "Skipping persisted transfer");
                }
            }
        }

        info!(target: "ferry.queue", restored, "Restored transfer queue");
        self.admit(state, Instant::now());
        self.settle(state, true);
        Ok(restored)
    }

    /// Stop the queue.
    ///
    /// Running backend work is paused (keeping partial data), the runner is
    /// stopped and the current state is saved once more. Statuses are left
    /// as they are so a later [`TransferQueue::restore`] can pick them up.
    pub async fn shutdown(&self) {
        {
            let mut guard = self.state.write().await;
            if guard.closed {
                return;
            }
            guard.closed = true;

            for (id, kind, handle) in guard.registry.active_handles() {
                if let Some(backend) = self.backends.get(&kind) {
                    debug!(target: "ferry.queue", id = %id, "Pausing transfer for shutdown");
                    backend.pause(handle);
                }
            }
        }
        self.shutdown.cancel();

        let _persist = self.persist_lock.lock().await;
        let records = self.state.read().await.registry.records();
        if let Err(error) = self.store.save(&records).await {
            warn!(target: "ferry.queue", %error, "Final save failed");
        }
        info!(target: "ferry.queue", count = records.len(), "Transfer queue shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // =========================================================================
    // Runner
    // =========================================================================

    /// The main runner loop.
    ///
    /// Runs until shutdown, processing backend reports, snapshot ticks and
    /// retry wake-ups.
    async fn run_loop(&self) {
        let Some(mut signals) = self.signal_rx.lock().await.take() else {
            warn!(target: "ferry.queue", "Runner already consumed the report channel");
            return;
        };

        let mut ticker = interval(self.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(target: "ferry.queue", "Scheduler loop started");

        loop {
            let next_retry = self.state.read().await.next_retry_at;

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.handle_tick().await,
                () = sleep_until_opt(next_retry) => self.handle_retry_wake().await,
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
                () = self.retry_notify.notified() => {}
            }
        }

        debug!(target: "ferry.queue", "Scheduler loop stopped");
    }

    async fn handle_signal(&self, signal: BackendSignal) {
        let BackendSignal { id, lease, report } = signal;
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return;
        }
        let now = Instant::now();

        match report {
            BackendReport::Progress(update) => {
                if !state.registry.is_current(&id, lease) {
                    trace!(target: "ferry.queue", id = %id, lease = lease.value(), "Ignoring stale progress");
                    return;
                }
                let speed = match update.speed_bps {
                    Some(speed) => speed,
                    None => state
                        .speeds
                        .entry(id.clone())
                        .or_insert_with(|| SpeedTracker::new(0, now))
                        .sample(update.downloaded, now),
                };
                state
                    .registry
                    .apply_progress(&id, lease, update.downloaded, update.total, speed);
                state.throttle.mark_dirty();
            }
            BackendReport::Done => {
                if self.record_finish(state, &id, lease, Ok(()), now) {
                    self.admit(state, now);
                    self.settle(state, false);
                }
            }
            BackendReport::Failed(error) => {
                if self.record_finish(state, &id, lease, Err(error), now) {
                    self.admit(state, now);
                    self.settle(state, false);
                }
            }
        }
    }

    /// Emit the periodic snapshot unless a transition just sent one.
    async fn handle_tick(&self) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed || !state.throttle.should_emit(Instant::now()) {
            return;
        }

        let snapshot = Self::snapshot_of(&state.registry);
        trace!(target: "ferry.queue", transfers = snapshot.transfers.len(), "Periodic snapshot");
        self.broadcaster
            .publish(TransferEvent::Snapshot { snapshot });
        if state.throttle.take_dirty() {
            self.request_save();
        }
    }

    async fn handle_retry_wake(&self) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.closed {
            return;
        }
        trace!(target: "ferry.queue", "Retry delay elapsed");
        self.admit(state, Instant::now());
        self.settle(state, false);
    }

    /// Save the latest state whenever the save generation moves.
    async fn run_persister(&self, mut save_rx: watch::Receiver<u64>) {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                changed = save_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.persist().await;
                }
            }
        }
    }

    async fn persist(&self) {
        let _persist = self.persist_lock.lock().await;
        if self.shutdown.is_cancelled() {
            return;
        }

        let records = self.state.read().await.registry.records();
        match self.store.save(&records).await {
            Ok(()) => {
                trace!(target: "ferry.queue", count = records.len(), "Persisted transfer queue");
            }
            Err(error) => {
                warn!(target: "ferry.queue", %error, "Failed to persist transfer queue");
            }
        }
    }

    // =========================================================================
    // Critical-section helpers (caller holds the write lock)
    // =========================================================================

    /// Run admission until nothing more can start.
    ///
    /// A backend that refuses to start is routed through the failure path,
    /// which can free the slot again, so admission repeats until a pass
    /// admits nothing.
    fn admit(&self, state: &mut SchedulerState, now: Instant) {
        let previous_retry = state.next_retry_at;

        loop {
            let pass = state.registry.admit(now);
            state.next_retry_at = pass.next_retry_at;
            if pass.admitted.is_empty() {
                break;
            }
            for admitted in pass.admitted {
                self.launch(state, admitted, now);
            }
        }

        if state.next_retry_at != previous_retry {
            self.retry_notify.notify_one();
        }
    }

    /// Hand an admitted transfer to its backend.
    fn launch(&self, state: &mut SchedulerState, admitted: Admitted, now: Instant) {
        let Admitted {
            record,
            lease,
            resume,
        } = admitted;
        let id = record.id.clone();
        state
            .speeds
            .insert(id.clone(), SpeedTracker::new(record.downloaded_bytes, now));

        let Some(backend) = self.backends.get(&record.kind) else {
            let error = TransferError::unsupported_kind(record.kind);
            warn!(target: "ferry.queue", id = %id, kind = %record.kind, "No backend for transfer kind");
            self.record_finish(state, &id, lease, Err(error), now);
            return;
        };

        if let Some(handle) = resume {
            info!(target: "ferry.queue", id = %id, lease = lease.value(), "Transfer resumed in backend");
            backend.resume(handle);
            return;
        }

        let reporter = ProgressReporter::new(id.clone(), lease, self.signal_tx.clone());
        match backend.start(&record, reporter) {
            Ok(handle) => {
                if state.registry.bind_handle(&id, lease, handle) {
                    info!(
                        target: "ferry.queue",
                        id = %id,
                        kind = %record.kind,
                        lease = lease.value(),
                        retry_count = record.retry_count,
                        "Transfer started"
                    );
                } else {
                    backend.cancel(handle);
                }
            }
            Err(error) => {
                warn!(target: "ferry.queue", id = %id, %error, "Backend refused to start transfer");
                self.record_finish(state, &id, lease, Err(error), now);
            }
        }
    }

    /// Apply a terminal report. Returns `false` if it was stale.
    fn record_finish(
        &self,
        state: &mut SchedulerState,
        id: &TransferId,
        lease: Lease,
        result: Result<(), TransferError>,
        now: Instant,
    ) -> bool {
        match state.registry.finish(id, lease, result, now) {
            Finish::Completed => {
                info!(target: "ferry.queue", id = %id, "Transfer completed");
            }
            Finish::Retrying { attempt, delay } => {
                let max_retries = state.registry.policy().max_retries;
                warn!(
                    target: "ferry.queue",
                    id = %id,
                    attempt,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transfer failed, will retry"
                );
            }
            Finish::Failed {
                error,
                retries_exhausted,
            } => {
                warn!(target: "ferry.queue", id = %id, %error, retries_exhausted, "Transfer failed");
            }
            Finish::Detached => {
                debug!(target: "ferry.queue", id = %id, "Backend finished while paused; next resume starts over");
            }
            Finish::Stale => {
                debug!(target: "ferry.queue", id = %id, lease = lease.value(), "Ignoring stale report (lease mismatch)");
                return false;
            }
        }
        true
    }

    /// Publish the effects of one critical section: status changes, the
    /// completion notifier, drain summary and an immediate snapshot.
    fn settle(&self, state: &mut SchedulerState, structural: bool) {
        let transitions = state.registry.take_transitions();

        for transition in &transitions {
            trace!(
                target: "ferry.queue",
                id = %transition.id,
                from = %transition.from,
                to = %transition.to,
                "Status changed"
            );
            if transition.to == TransferStatus::Completed {
                if let Some(record) = state.registry.get(&transition.id) {
                    self.notifier.notify(record);
                }
            }
            self.broadcaster.publish(TransferEvent::StatusChanged {
                id: transition.id.clone(),
                from: transition.from,
                to: transition.to,
                error: transition.error.clone(),
            });
        }

        let registry = &state.registry;
        state.speeds.retain(|id, _| {
            registry
                .get(id)
                .is_some_and(|record| record.status == TransferStatus::Downloading)
        });

        let stats = state.registry.stats();
        if let Some(summary) = state.drain.observe(&transitions, &stats, Utc::now()) {
            info!(
                target: "ferry.queue",
                completed = summary.completed,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "Queue drained"
            );
            self.broadcaster
                .publish(TransferEvent::QueueDrained { summary });
        }

        if structural || !transitions.is_empty() {
            let snapshot = Self::snapshot_of(&state.registry);
            state.throttle.emitted(Instant::now());
            self.broadcaster
                .publish(TransferEvent::Snapshot { snapshot });
            self.request_save();
        }
    }

    fn backend_of(&self, state: &SchedulerState, id: &TransferId) -> Option<&Arc<dyn TransferBackend>> {
        state
            .registry
            .get(id)
            .and_then(|record| self.backends.get(&record.kind))
    }

    fn request_save(&self) {
        self.save_tx
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn snapshot_of(registry: &TransferRegistry) -> QueueSnapshot {
        QueueSnapshot {
            transfers: registry.records(),
            stats: registry.stats(),
            taken_at: Utc::now(),
        }
    }

    fn rejected(action: &'static str, error: &QueueError) -> bool {
        debug!(target: "ferry.queue", action, %error, "Operation rejected");
        false
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
