//! Integration tests for `TransferQueue`.
//!
//! These tests drive the queue through a scripted backend that never touches
//! the network. The test decides when each transfer reports progress,
//! completes or fails; the queue's runner processes those reports exactly as
//! it would for a real backend.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use tokio::sync::broadcast;

use common::{
    BackendCall, ScriptedBackend, http_record, queue_with, status_of, test_config, wait_for_status,
    wait_until,
};
use ferry_core::{ConfigError, MemoryTransferStore, NoopNotifier};
use ferry_queue::{
    CompletionNotifierPort, Priority, ProgressUpdate, StoreError, TransferError, TransferEvent,
    TransferEventEmitterPort, TransferId, TransferKind, TransferQueueDeps, TransferRecord,
    TransferStatus, TransferStorePort, build_transfer_queue,
};

use TransferStatus::{Cancelled, Completed, Downloading, Failed, Paused, Queued};

fn tid(id: &str) -> TransferId {
    TransferId::new(id)
}

/// Drain everything already published on `rx`.
fn drain_events(rx: &mut broadcast::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Receive events until `pick` matches one, failing after two seconds.
async fn next_matching<T>(
    rx: &mut broadcast::Receiver<TransferEvent>,
    mut pick: impl FnMut(TransferEvent) -> Option<T>,
) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let Some(found) = pick(event) {
            return found;
        }
    }
}

fn status_changes(events: &[TransferEvent], id: &str) -> Vec<(TransferStatus, TransferStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::StatusChanged { id: changed, from, to, .. } if changed.as_str() == id => {
                Some((*from, *to))
            }
            _ => None,
        })
        .collect()
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn enqueued_transfer_runs_to_completion() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(2));

    assert!(queue.enqueue(http_record("t1")).await);
    assert_eq!(status_of(&queue, "t1").await, Some(Downloading));
    assert_eq!(backend.starts(), vec![tid("t1")]);

    backend.progress("t1", 40, Some(100));
    backend.complete("t1");
    wait_for_status(&queue, "t1", Completed).await;

    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert!((record.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(record.downloaded_bytes, 100);
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());

    let stats = queue.stats().await;
    assert_eq!(stats.active, 0);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn metadata_is_carried_through() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    let record = http_record("t1").with_metadata(json!({ "model": "llama", "shard": 2 }));
    assert!(queue.enqueue(record).await);
    backend.complete("t1");
    wait_for_status(&queue, "t1", Completed).await;

    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert_eq!(record.metadata["model"], "llama");
    assert_eq!(record.metadata["shard"], 2);
}

#[tokio::test]
async fn enqueue_rejects_existing_ids_in_any_status() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(!queue.enqueue(http_record("t1")).await);

    backend.complete("t1");
    wait_for_status(&queue, "t1", Completed).await;
    assert!(!queue.enqueue(http_record("t1")).await);

    // Removing frees the id for a fresh transfer.
    assert!(queue.remove(&tid("t1")).await);
    assert!(queue.enqueue(http_record("t1")).await);
    assert_eq!(backend.start_count("t1"), 2);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let deps = TransferQueueDeps::new(test_config(65));
    assert!(matches!(
        build_transfer_queue(deps),
        Err(ConfigError::InvalidMaxConcurrent(65))
    ));
}

// ── Admission ──────────────────────────────────────────────────────

#[tokio::test]
async fn backpressure_holds_work_until_a_slot_frees() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.enqueue(http_record("t2")).await);
    assert_eq!(status_of(&queue, "t1").await, Some(Downloading));
    assert_eq!(status_of(&queue, "t2").await, Some(Queued));

    backend.complete("t1");
    wait_for_status(&queue, "t2", Downloading).await;
    assert_eq!(backend.starts(), vec![tid("t1"), tid("t2")]);
}

#[tokio::test]
async fn active_count_never_exceeds_limit() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(3));

    for i in 0..10 {
        assert!(queue.enqueue(http_record(&format!("t{i}"))).await);
    }

    for i in 0..10 {
        let b = backend.clone();
        wait_until(move || {
            let b = b.clone();
            async move { b.starts().len() > i }
        })
        .await;
        let stats = queue.stats().await;
        assert!(stats.active <= 3, "active {} exceeds limit", stats.active);

        let id = backend.starts()[i].clone();
        backend.complete(id.as_str());
    }

    let q = queue.clone();
    wait_until(move || {
        let q = q.clone();
        async move { q.stats().await.completed == 10 }
    })
    .await;
    assert_eq!(backend.starts().len(), 10);
}

#[tokio::test]
async fn higher_priority_is_admitted_first() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(0));

    assert!(queue.enqueue(http_record("a")).await);
    assert!(queue.enqueue(http_record("b").with_priority(Priority::Low)).await);
    assert!(queue.enqueue(http_record("c").with_priority(Priority::High)).await);
    assert!(queue.enqueue(http_record("d")).await);
    assert!(backend.starts().is_empty());

    queue.update_concurrency(1).await;
    for id in ["c", "a", "d", "b"] {
        wait_for_status(&queue, id, Downloading).await;
        backend.complete(id);
    }

    assert_eq!(
        backend.starts(),
        vec![tid("c"), tid("a"), tid("d"), tid("b")]
    );
}

#[tokio::test]
async fn set_priority_reorders_queued_only() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(0));

    assert!(queue.enqueue(http_record("a")).await);
    assert!(queue.enqueue(http_record("b")).await);
    assert!(queue.set_priority(&tid("b"), Priority::High).await);
    assert!(!queue.set_priority(&tid("missing"), Priority::High).await);

    queue.update_concurrency(1).await;
    assert_eq!(backend.starts(), vec![tid("b")]);

    // Running transfers keep their priority.
    assert!(!queue.set_priority(&tid("b"), Priority::Low).await);
    assert_eq!(
        queue.get_by_id(&tid("b")).await.unwrap().priority,
        Priority::High
    );
}

#[tokio::test]
async fn lowering_concurrency_keeps_running_transfers() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(3));

    for i in 0..5 {
        assert!(queue.enqueue(http_record(&format!("t{i}"))).await);
    }
    assert_eq!(queue.stats().await.active, 3);

    queue.update_concurrency(1).await;
    let stats = queue.stats().await;
    assert_eq!(stats.active, 3);
    assert_eq!(stats.max_concurrent, 1);

    backend.complete("t0");
    wait_for_status(&queue, "t0", Completed).await;
    backend.complete("t1");
    wait_for_status(&queue, "t1", Completed).await;
    assert_eq!(backend.starts().len(), 3);

    backend.complete("t2");
    wait_for_status(&queue, "t3", Downloading).await;
    assert_eq!(queue.stats().await.active, 1);
    assert_eq!(status_of(&queue, "t4").await, Some(Queued));
}

#[tokio::test]
async fn missing_backend_fails_transfer() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    let swarm = TransferRecord::new(
        "s1",
        TransferKind::Swarm,
        "magnet:?xt=urn:btih:abc",
        "/tmp/ferry-tests",
    );
    assert!(queue.enqueue(swarm).await);

    let record = queue.get_by_id(&tid("s1")).await.unwrap();
    assert_eq!(record.status, Failed);
    assert_eq!(record.retry_count, 0);
    assert!(
        record
            .last_error
            .unwrap()
            .contains("No backend registered for swarm")
    );
    assert_eq!(queue.stats().await.active, 0);
}

// ── Retries ────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_failures_retry_then_fail() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1).with_max_retries(2));
    let mut rx = queue.subscribe();

    assert!(queue.enqueue(http_record("t1")).await);
    for attempt in 1..=2 {
        backend.fail("t1", TransferError::connection("reset by peer"));
        let b = backend.clone();
        wait_until(move || {
            let b = b.clone();
            async move { b.start_count("t1") == attempt + 1 }
        })
        .await;
    }
    backend.fail("t1", TransferError::connection("reset by peer"));
    wait_for_status(&queue, "t1", Failed).await;

    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert_eq!(record.retry_count, 2);
    assert_eq!(
        record.last_error.as_deref(),
        Some("Connection failed: reset by peer")
    );
    assert_eq!(backend.start_count("t1"), 3);

    assert_eq!(
        status_changes(&drain_events(&mut rx), "t1"),
        vec![
            (Queued, Downloading),
            (Downloading, Queued),
            (Queued, Downloading),
            (Downloading, Queued),
            (Queued, Downloading),
            (Downloading, Failed),
        ]
    );
}

#[tokio::test]
async fn permanent_failure_skips_retries() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    backend.fail("t1", TransferError::http_status("gone", 404));
    wait_for_status(&queue, "t1", Failed).await;

    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert_eq!(record.retry_count, 0);
    assert_eq!(backend.start_count("t1"), 1);

    // Failed is final.
    assert!(!queue.resume(&tid("t1")).await);
    assert!(!queue.cancel(&tid("t1")).await);
}

#[tokio::test]
async fn refused_starts_consume_retry_budget() {
    let backend = ScriptedBackend::http();
    backend.refuse_starts(TransferError::timeout("connect"));
    let queue = queue_with(&backend, test_config(1).with_max_retries(2));

    assert!(queue.enqueue(http_record("t1")).await);

    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert_eq!(record.status, Failed);
    assert_eq!(record.retry_count, 2);
    assert_eq!(backend.start_count("t1"), 3);
    assert_eq!(queue.stats().await.active, 0);
}

#[tokio::test]
async fn retry_waits_out_its_delay() {
    let backend = ScriptedBackend::http();
    let config = test_config(1).with_retry_delay(Duration::from_millis(100));
    let queue = queue_with(&backend, config);

    assert!(queue.enqueue(http_record("t1")).await);
    let failed_at = std::time::Instant::now();
    backend.fail("t1", TransferError::network("connection dropped"));
    wait_for_status(&queue, "t1", Queued).await;
    assert_eq!(backend.start_count("t1"), 1);

    wait_for_status(&queue, "t1", Downloading).await;
    assert!(failed_at.elapsed() >= Duration::from_millis(100));
    assert_eq!(backend.start_count("t1"), 2);
    assert_eq!(queue.get_by_id(&tid("t1")).await.unwrap().retry_count, 1);
}

#[tokio::test]
async fn waiting_retry_does_not_block_later_transfers() {
    let backend = ScriptedBackend::http();
    let config = test_config(1).with_retry_delay(Duration::from_secs(60));
    let queue = queue_with(&backend, config);

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.enqueue(http_record("t2")).await);
    backend.fail("t1", TransferError::network("connection dropped"));

    wait_for_status(&queue, "t2", Downloading).await;
    assert_eq!(status_of(&queue, "t1").await, Some(Queued));
}

// ── Pause / resume / cancel / remove ───────────────────────────────

#[tokio::test]
async fn pause_frees_capacity_and_resume_reuses_handle() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.enqueue(http_record("t2")).await);

    assert!(queue.pause(&tid("t1")).await);
    assert!(!queue.pause(&tid("t1")).await);
    assert_eq!(status_of(&queue, "t1").await, Some(Paused));
    assert_eq!(status_of(&queue, "t2").await, Some(Downloading));
    assert!(backend.calls().contains(&BackendCall::Pause(tid("t1"))));

    assert!(queue.resume(&tid("t1")).await);
    assert!(!queue.resume(&tid("t1")).await);
    assert_eq!(status_of(&queue, "t1").await, Some(Queued));

    backend.complete("t2");
    wait_for_status(&queue, "t1", Downloading).await;
    assert!(backend.calls().contains(&BackendCall::Resume(tid("t1"))));
    assert_eq!(backend.start_count("t1"), 1);

    // The original reporter is still current after resume.
    backend.complete("t1");
    wait_for_status(&queue, "t1", Completed).await;
}

#[tokio::test]
async fn finishing_while_paused_restarts_on_resume() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    let first = backend.reporter("t1");
    assert!(queue.pause(&tid("t1")).await);

    assert!(first.failed(TransferError::network("socket closed")));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(status_of(&queue, "t1").await, Some(Paused));

    assert!(queue.resume(&tid("t1")).await);
    assert_eq!(status_of(&queue, "t1").await, Some(Downloading));
    assert_eq!(backend.start_count("t1"), 2);
}

#[tokio::test]
async fn cancel_is_idempotent_and_ignores_late_reports() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    let reporter = backend.reporter("t1");

    assert!(queue.cancel(&tid("t1")).await);
    assert!(!queue.cancel(&tid("t1")).await);
    assert!(backend.calls().contains(&BackendCall::Cancel(tid("t1"))));

    assert!(reporter.done());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(status_of(&queue, "t1").await, Some(Cancelled));
    assert_eq!(queue.stats().await.cancelled, 1);
}

#[tokio::test]
async fn reports_from_superseded_attempt_are_dropped() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    let first = backend.reporter("t1");
    backend.fail("t1", TransferError::timeout("read"));
    let b = backend.clone();
    wait_until(move || {
        let b = b.clone();
        async move { b.start_count("t1") == 2 }
    })
    .await;

    assert!(first.progress(ProgressUpdate::new(999, Some(1000))));
    assert!(first.done());
    tokio::time::sleep(Duration::from_millis(30)).await;

    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert_eq!(record.status, Downloading);
    assert_eq!(record.downloaded_bytes, 0);

    backend.complete("t1");
    wait_for_status(&queue, "t1", Completed).await;
}

#[tokio::test]
async fn cancel_paused_and_queued_transfers() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.enqueue(http_record("t2")).await);
    assert!(queue.pause(&tid("t1")).await);

    assert!(queue.cancel(&tid("t1")).await);
    assert!(queue.cancel(&tid("t2")).await);
    assert_eq!(status_of(&queue, "t1").await, Some(Cancelled));
    assert_eq!(status_of(&queue, "t2").await, Some(Cancelled));
    assert_eq!(queue.stats().await.active, 0);
}

#[tokio::test]
async fn remove_active_transfer_frees_its_slot() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));
    let mut rx = queue.subscribe();

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.enqueue(http_record("t2")).await);

    assert!(queue.remove(&tid("t1")).await);
    assert!(!queue.remove(&tid("t1")).await);
    assert!(queue.get_by_id(&tid("t1")).await.is_none());
    assert!(backend.calls().contains(&BackendCall::Cancel(tid("t1"))));
    assert_eq!(status_of(&queue, "t2").await, Some(Downloading));

    let events = drain_events(&mut rx);
    assert!(events.contains(&TransferEvent::Removed { id: tid("t1") }));
}

#[tokio::test]
async fn clear_completed_keeps_other_records() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(3));

    for id in ["t1", "t2", "t3"] {
        assert!(queue.enqueue(http_record(id)).await);
    }
    backend.complete("t1");
    backend.complete("t2");
    backend.fail("t3", TransferError::not_found("no such file"));
    wait_for_status(&queue, "t3", Failed).await;
    wait_for_status(&queue, "t2", Completed).await;
    wait_for_status(&queue, "t1", Completed).await;

    assert_eq!(queue.clear_completed().await, 2);
    assert_eq!(queue.clear_completed().await, 0);

    let remaining: Vec<_> = queue.get_all().await.into_iter().map(|r| r.id).collect();
    assert_eq!(remaining, vec![tid("t3")]);
}

// ── Progress & events ──────────────────────────────────────────────

#[tokio::test]
async fn progress_updates_record_and_periodic_snapshot() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    let mut rx = queue.subscribe();

    backend.progress("t1", 50, Some(100));
    let snapshot = next_matching(&mut rx, |event| match event {
        TransferEvent::Snapshot { snapshot }
            if snapshot
                .get(&tid("t1"))
                .is_some_and(|record| record.downloaded_bytes == 50) =>
        {
            Some(snapshot)
        }
        _ => None,
    })
    .await;

    let record = snapshot.get(&tid("t1")).unwrap();
    assert_eq!(record.downloaded_bytes, 50);
    assert_eq!(record.total_bytes, Some(100));
    assert!((record.progress - 0.5).abs() < f64::EPSILON);
    assert!(record.speed_bps >= 0.0);
    assert_eq!(snapshot.stats.active, 1);
}

#[tokio::test]
async fn periodic_snapshot_arrives_without_progress() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    let mut rx = queue.subscribe();

    // No reports at all: the transfer sits in Downloading.
    let snapshot = tokio::time::timeout(
        Duration::from_millis(150),
        next_matching(&mut rx, |event| match event {
            TransferEvent::Snapshot { snapshot } => Some(snapshot),
            _ => None,
        }),
    )
    .await
    .expect("no periodic snapshot within two intervals");

    assert_eq!(snapshot.get(&tid("t1")).unwrap().status, Downloading);
    assert_eq!(snapshot.stats.active, 1);

    // And it keeps coming while nothing changes.
    next_matching(&mut rx, |event| match event {
        TransferEvent::Snapshot { .. } => Some(()),
        _ => None,
    })
    .await;
}

#[tokio::test]
async fn backend_measured_speed_is_used_as_is() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(
        backend
            .reporter("t1")
            .progress(ProgressUpdate::new(10, Some(100)).with_speed(42.0))
    );

    let q = queue.clone();
    wait_until(move || {
        let q = q.clone();
        async move { q.get_by_id(&tid("t1")).await.unwrap().downloaded_bytes == 10 }
    })
    .await;
    let record = queue.get_by_id(&tid("t1")).await.unwrap();
    assert!((record.speed_bps - 42.0).abs() < f64::EPSILON);
    assert!(record.eta_seconds.is_some());
}

#[tokio::test]
async fn enqueue_publishes_added_then_transition_then_snapshot() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));
    let mut rx = queue.subscribe();

    assert!(queue.enqueue(http_record("t1").with_priority(Priority::High)).await);

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        TransferEvent::Added {
            id: tid("t1"),
            priority: Priority::High
        }
    );
    assert_eq!(
        events[1],
        TransferEvent::status_changed(tid("t1"), Queued, Downloading)
    );
    assert!(matches!(&events[2], TransferEvent::Snapshot { snapshot } if snapshot.transfers.len() == 1));
}

#[tokio::test]
async fn queue_drained_once_per_busy_period() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(2));
    let mut rx = queue.subscribe();

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.enqueue(http_record("t2")).await);
    backend.complete("t1");
    backend.fail("t2", TransferError::not_found("missing"));

    let summary = next_matching(&mut rx, |event| match event {
        TransferEvent::QueueDrained { summary } => Some(summary),
        _ => None,
    })
    .await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cancelled, 0);
    assert!(summary.drained_at >= summary.started_at);

    // A new busy period produces its own summary.
    assert!(queue.enqueue(http_record("t3")).await);
    assert!(queue.cancel(&tid("t3")).await);
    let summary = next_matching(&mut rx, |event| match event {
        TransferEvent::QueueDrained { summary } => Some(summary),
        _ => None,
    })
    .await;
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.cancelled, 1);
}

#[tokio::test]
async fn callback_subscription_receives_events() {
    let backend = ScriptedBackend::http();
    let queue = queue_with(&backend, test_config(1));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let subscription = queue.subscribe_with(move |event| {
        sink.lock().unwrap().push(event);
    });
    assert_eq!(queue.subscriber_count(), 1);

    assert!(queue.enqueue(http_record("t1")).await);
    let s = seen.clone();
    wait_until(move || {
        let s = s.clone();
        async move { s.lock().unwrap().len() >= 3 }
    })
    .await;
    assert_eq!(
        seen.lock().unwrap()[0],
        TransferEvent::Added {
            id: tid("t1"),
            priority: Priority::Normal
        }
    );

    drop(subscription);
    let q = queue.clone();
    wait_until(move || {
        let q = q.clone();
        async move { q.subscriber_count() == 0 }
    })
    .await;
}

struct RecordingEmitter(Arc<Mutex<Vec<TransferEvent>>>);

impl TransferEventEmitterPort for RecordingEmitter {
    fn emit(&self, event: TransferEvent) {
        self.0.lock().unwrap().push(event);
    }

    fn clone_box(&self) -> Box<dyn TransferEventEmitterPort> {
        Box::new(Self(Arc::clone(&self.0)))
    }
}

#[tokio::test]
async fn event_emitter_port_sees_every_event() {
    let backend = ScriptedBackend::http();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let deps = TransferQueueDeps::new(test_config(1))
        .with_backend(backend.clone())
        .with_event_emitter(Arc::new(RecordingEmitter(seen.clone())));
    let queue = build_transfer_queue(deps).unwrap();

    assert!(queue.enqueue(http_record("t1")).await);
    assert!(queue.pause(&tid("t1")).await);

    let events = seen.lock().unwrap().clone();
    assert_eq!(
        status_changes(&events, "t1"),
        vec![(Queued, Downloading), (Downloading, Paused)]
    );
}

// ── Completion notifier ────────────────────────────────────────────

mock! {
    pub Notifier {}

    impl CompletionNotifierPort for Notifier {
        fn notify(&self, record: &TransferRecord);
    }
}

#[tokio::test]
async fn notifier_called_once_per_completion() {
    let backend = ScriptedBackend::http();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify()
        .withf(|record| record.id.as_str() == "t1" && record.status == Completed)
        .times(1)
        .returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let deps = TransferQueueDeps::new(test_config(1))
        .with_backend(backend.clone())
        .with_notifier(Arc::new(notifier));
    let queue = build_transfer_queue(deps).unwrap();

    assert!(queue.enqueue(http_record("t1")).await);
    let reporter = backend.reporter("t1");
    assert!(reporter.done());
    assert!(reporter.done());
    wait_for_status(&queue, "t1", Completed).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Persistence ────────────────────────────────────────────────────

mock! {
    pub Store {}

    #[async_trait]
    impl TransferStorePort for Store {
        async fn save(&self, records: &[TransferRecord]) -> Result<(), StoreError>;
        async fn load(&self) -> Result<Vec<TransferRecord>, StoreError>;
    }
}

fn persisted(id: &str, status: TransferStatus) -> TransferRecord {
    let mut record = http_record(id);
    record.status = status;
    record
}

#[tokio::test]
async fn restore_requeues_interrupted_work() {
    let backend = ScriptedBackend::http();

    let mut interrupted = persisted("d1", Downloading);
    interrupted.retry_count = 1;
    interrupted.downloaded_bytes = 500;
    interrupted.speed_bps = 1234.0;
    let mut paused = persisted("p1", Paused);
    paused.retry_count = 1;
    let saved = vec![
        persisted("q1", Queued),
        interrupted,
        paused,
        persisted("c1", Completed),
    ];

    let mut store = MockStore::new();
    store
        .expect_load()
        .times(1)
        .returning(move || Ok(saved.clone()));
    store.expect_save().returning(|_| Ok(()));

    let deps = TransferQueueDeps::new(test_config(0))
        .with_backend(backend.clone())
        .with_store(Arc::new(store));
    let queue = build_transfer_queue(deps).unwrap();

    let restored = tokio_test::assert_ok!(queue.restore().await);
    assert_eq!(restored, 4);

    let d1 = queue.get_by_id(&tid("d1")).await.unwrap();
    assert_eq!(d1.status, Queued);
    assert_eq!(d1.retry_count, 1);
    assert_eq!(d1.downloaded_bytes, 500);
    assert!(d1.speed_bps.abs() < f64::EPSILON);
    assert_eq!(status_of(&queue, "q1").await, Some(Queued));
    let p1 = queue.get_by_id(&tid("p1")).await.unwrap();
    assert_eq!(p1.status, Queued);
    assert_eq!(p1.retry_count, 1);
    assert_eq!(status_of(&queue, "c1").await, Some(Completed));

    queue.update_concurrency(1).await;
    assert_eq!(backend.starts(), vec![tid("q1")]);

    // Restored work goes through admission in bucket order and starts fresh.
    queue.update_concurrency(3).await;
    assert_eq!(backend.starts(), vec![tid("q1"), tid("d1"), tid("p1")]);
    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::Resume(_)))
    );
}

#[tokio::test]
async fn restore_skips_ids_already_present() {
    let backend = ScriptedBackend::http();
    let mut store = MockStore::new();
    store
        .expect_load()
        .returning(|| Ok(vec![persisted("t1", Queued), persisted("t2", Queued)]));
    store.expect_save().returning(|_| Ok(()));

    let deps = TransferQueueDeps::new(test_config(0))
        .with_backend(backend.clone())
        .with_store(Arc::new(store));
    let queue = build_transfer_queue(deps).unwrap();

    assert!(queue.enqueue(http_record("t1")).await);
    assert_eq!(queue.restore().await.unwrap(), 1);
    assert_eq!(queue.get_all().await.len(), 2);
}

#[tokio::test]
async fn restore_surfaces_store_errors() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .returning(|| Err(StoreError::Unavailable("disk gone".to_string())));
    store.expect_save().returning(|_| Ok(()));

    let deps = TransferQueueDeps::new(test_config(1)).with_store(Arc::new(store));
    let queue = build_transfer_queue(deps).unwrap();

    tokio_test::assert_err!(queue.restore().await);
    assert!(queue.get_all().await.is_empty());
}

#[tokio::test]
async fn changes_are_persisted_in_background() {
    let backend = ScriptedBackend::http();
    let store = Arc::new(MemoryTransferStore::new());
    let deps = TransferQueueDeps::new(test_config(1))
        .with_backend(backend.clone())
        .with_store(store.clone());
    let queue = build_transfer_queue(deps).unwrap();

    assert!(queue.enqueue(http_record("t1")).await);
    backend.complete("t1");

    let s = store.clone();
    wait_until(move || {
        let s = s.clone();
        async move {
            s.records()
                .await
                .first()
                .is_some_and(|record| record.status == Completed)
        }
    })
    .await;
}

#[tokio::test]
async fn shutdown_pauses_backends_and_saves_state() {
    let backend = ScriptedBackend::http();
    let store = Arc::new(MemoryTransferStore::new());
    let deps = TransferQueueDeps::new(test_config(2))
        .with_backend(backend.clone())
        .with_store(store.clone())
        .with_notifier(Arc::new(NoopNotifier));
    let queue = build_transfer_queue(deps).unwrap();

    for id in ["t1", "t2", "t3"] {
        assert!(queue.enqueue(http_record(id)).await);
    }

    queue.shutdown().await;
    assert!(queue.is_shut_down());
    assert!(backend.calls().contains(&BackendCall::Pause(tid("t1"))));
    assert!(backend.calls().contains(&BackendCall::Pause(tid("t2"))));

    // Closed queues refuse work and ignore late reports.
    assert!(!queue.enqueue(http_record("t4")).await);
    assert!(!queue.pause(&tid("t1")).await);
    let _ = backend.reporter("t1").done();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(status_of(&queue, "t1").await, Some(Downloading));

    let saved = store.records().await;
    let statuses: Vec<_> = saved.iter().map(|r| (r.id.as_str(), r.status)).collect();
    assert_eq!(
        statuses,
        vec![("t1", Downloading), ("t2", Downloading), ("t3", Queued)]
    );

    // A new session picks the work back up.
    let next = ScriptedBackend::http();
    let deps = TransferQueueDeps::new(test_config(0))
        .with_backend(next.clone())
        .with_store(store.clone());
    let resumed = build_transfer_queue(deps).unwrap();
    assert_eq!(resumed.restore().await.unwrap(), 3);
    let stats = resumed.stats().await;
    assert_eq!(stats.queued, 3);
    assert_eq!(stats.active, 0);
}
