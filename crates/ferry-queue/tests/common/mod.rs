//! Shared helpers for ferry-queue integration tests.
//!
//! [`ScriptedBackend`] accepts every start, records each call the queue makes
//! and keeps the reporter of the latest attempt so tests decide when a
//! transfer progresses, finishes or fails.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferry_queue::{
    BackendHandle, ProgressReporter, ProgressUpdate, QueueConfig, TransferBackend, TransferError,
    TransferId, TransferKind, TransferQueue, TransferQueueDeps, TransferRecord, TransferStatus,
    build_transfer_queue,
};

/// A backend call observed by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Start(TransferId),
    Pause(TransferId),
    Resume(TransferId),
    Cancel(TransferId),
}

#[derive(Default)]
struct Script {
    calls: Vec<BackendCall>,
    reporters: HashMap<TransferId, ProgressReporter>,
    handles: HashMap<BackendHandle, TransferId>,
    refuse_with: Option<TransferError>,
}

pub struct ScriptedBackend {
    kind: TransferKind,
    next_handle: AtomicU64,
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new(kind: TransferKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            next_handle: AtomicU64::new(1),
            script: Mutex::new(Script::default()),
        })
    }

    pub fn http() -> Arc<Self> {
        Self::new(TransferKind::Http)
    }

    /// Make every following `start` fail with `error`.
    pub fn refuse_starts(&self, error: TransferError) {
        self.script.lock().unwrap().refuse_with = Some(error);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Ids passed to `start`, in call order.
    pub fn starts(&self) -> Vec<TransferId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Start(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn start_count(&self, id: &str) -> usize {
        self.starts().iter().filter(|s| s.as_str() == id).count()
    }

    /// Reporter of the latest start for `id`.
    pub fn reporter(&self, id: &str) -> ProgressReporter {
        self.script
            .lock()
            .unwrap()
            .reporters
            .get(&TransferId::new(id))
            .cloned()
            .unwrap_or_else(|| panic!("no start recorded for {id}"))
    }

    pub fn complete(&self, id: &str) {
        assert!(self.reporter(id).done());
    }

    pub fn fail(&self, id: &str, error: TransferError) {
        assert!(self.reporter(id).failed(error));
    }

    pub fn progress(&self, id: &str, downloaded: u64, total: Option<u64>) {
        assert!(
            self.reporter(id)
                .progress(ProgressUpdate::new(downloaded, total))
        );
    }

    fn record(&self, handle: BackendHandle, call: fn(TransferId) -> BackendCall) {
        let mut script = self.script.lock().unwrap();
        if let Some(id) = script.handles.get(&handle).cloned() {
            script.calls.push(call(id));
        }
    }
}

impl TransferBackend for ScriptedBackend {
    fn kind(&self) -> TransferKind {
        self.kind
    }

    fn start(
        &self,
        record: &TransferRecord,
        reporter: ProgressReporter,
    ) -> Result<BackendHandle, TransferError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(BackendCall::Start(record.id.clone()));
        if let Some(error) = script.refuse_with.clone() {
            return Err(error);
        }

        let handle = BackendHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        script.handles.insert(handle, record.id.clone());
        script.reporters.insert(record.id.clone(), reporter);
        Ok(handle)
    }

    fn pause(&self, handle: BackendHandle) {
        self.record(handle, BackendCall::Pause);
    }

    fn resume(&self, handle: BackendHandle) {
        self.record(handle, BackendCall::Resume);
    }

    fn cancel(&self, handle: BackendHandle) {
        self.record(handle, BackendCall::Cancel);
    }
}

/// Config for tests: no retry delay and the fastest allowed snapshot tick.
pub fn test_config(max_concurrent: u32) -> QueueConfig {
    QueueConfig::new()
        .with_max_concurrent(max_concurrent)
        .with_retry_delay(Duration::ZERO)
        .with_broadcast_interval(Duration::from_millis(50))
}

pub fn queue_with(backend: &Arc<ScriptedBackend>, config: QueueConfig) -> Arc<TransferQueue> {
    build_transfer_queue(TransferQueueDeps::new(config).with_backend(backend.clone()))
        .expect("valid test config")
}

pub fn http_record(id: &str) -> TransferRecord {
    TransferRecord::new(
        id,
        TransferKind::Http,
        format!("https://example.com/{id}.bin"),
        "/tmp/ferry-tests",
    )
}

/// Poll `check` until it holds, failing after two seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

pub async fn status_of(queue: &TransferQueue, id: &str) -> Option<TransferStatus> {
    queue
        .get_by_id(&TransferId::new(id))
        .await
        .map(|record| record.status)
}

pub async fn wait_for_status(queue: &TransferQueue, id: &str, status: TransferStatus) {
    wait_until(|| async move { status_of(queue, id).await == Some(status) }).await;
}
