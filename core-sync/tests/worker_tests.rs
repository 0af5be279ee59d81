//! Integration tests for the worker: the warm-up/assignment handshake,
//! composite copy execution, cancellation scope, progress discipline and
//! tracked-media mutation.

mod common;

use std::sync::Arc;

use bridge_traits::{HttpClient, StorageFile};
use chrono::Utc;
use common::*;
use core_index::{SqliteTrackedMediaStore, TrackedMediaItem, TrackedMediaStore};
use core_runtime::{AvailableStorages, CoreEvent, MediaScannerSettings, StorageObject, WorkerEvent};
use core_sync::{
    MediaScannerClient, SyncError, WorkStep, WorkStepAction, WorkStepStatus, Worker,
    MIRROR_STEP_PRIORITY,
};

const SCANNER_HOST: &str = "scanner.local";

fn build_worker(
    storages: AvailableStorages,
    store: &Arc<SqliteTrackedMediaStore>,
    http: Arc<dyn HttpClient>,
    scanner: MediaScannerSettings,
) -> Arc<Worker> {
    Arc::new(Worker::new(
        storages,
        store_as_dyn(store),
        Arc::new(MediaScannerClient::new(http, scanner)),
        event_bus(),
    ))
}

fn copy_step(name: &str, size: u64) -> WorkStep {
    WorkStep::new(
        WorkStepAction::Copy,
        StorageFile::new(name, size),
        TARGET_ID,
        MIRROR_STEP_PRIORITY,
    )
}

fn delete_step(name: &str, size: u64) -> WorkStep {
    WorkStep::new(
        WorkStepAction::Delete,
        StorageFile::new(name, size),
        TARGET_ID,
        MIRROR_STEP_PRIORITY,
    )
}

#[tokio::test]
async fn copy_lands_replica_records_target_and_scans() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    let store = sqlite_store().await;
    store
        .put(&TrackedMediaItem::new(
            "a.mov",
            SOURCE_ID,
            Utc::now().timestamp_millis(),
        ))
        .await
        .unwrap();

    let http = ScriptedHttpClient::new(&["202 MEDIA INFO OK"]);
    let bus = event_bus();
    let mut events = bus.subscribe();

    let worker = Arc::new(Worker::new(
        watch_pair(source, target.clone()),
        store_as_dyn(&store),
        Arc::new(MediaScannerClient::new(
            http.clone(),
            scanner_settings_for(Some(SCANNER_HOST)),
        )),
        bus,
    ));

    worker.warmup().unwrap();
    let result = worker.do_work(copy_step("a.mov", 100)).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Done);
    assert!(target.contains("a.mov"));

    // Replication success was recorded under per-key upsert.
    let tracked = store.get_by_name("a.mov").await.unwrap().unwrap();
    assert!(tracked.has_target(TARGET_ID));

    // The composite second phase hit the media-info endpoint once.
    let calls = http.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.ends_with("/media/scanAsync/a.mov"));

    // Step lifecycle is observable on the bus.
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Worker(worker_event) = event {
            statuses.push(match worker_event {
                WorkerEvent::StepStarted { .. } => "started".to_string(),
                WorkerEvent::StepFinished { status, .. } => status,
            });
        }
    }
    assert_eq!(statuses, vec!["started".to_string(), "done".to_string()]);

    // The worker is idle again.
    assert!(!worker.busy());
    assert!(worker.current_step().is_none());
    assert!(worker.last_begin_step().is_none());
}

#[tokio::test]
async fn do_work_without_warmup_is_a_contract_violation() {
    let store = sqlite_store().await;
    let worker = build_worker(
        watch_pair(MemoryStorageHandler::new(), MemoryStorageHandler::new()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    let result = worker.do_work(copy_step("a.mov", 100)).await;
    assert!(matches!(
        result,
        Err(SyncError::InvalidWorkerTransition { .. })
    ));
}

#[tokio::test]
async fn warmup_twice_fails_and_cooldown_recovers() {
    let store = sqlite_store().await;
    let worker = build_worker(
        watch_pair(MemoryStorageHandler::new(), MemoryStorageHandler::new()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    assert!(worker.busy());
    assert!(matches!(
        worker.warmup(),
        Err(SyncError::InvalidWorkerTransition { .. })
    ));

    worker.cooldown();
    assert!(!worker.busy());
    worker.warmup().unwrap();

    // Safe to call when not warming.
    worker.cooldown();
    worker.cooldown();
}

#[tokio::test]
async fn do_work_while_busy_fails_deterministically() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.set_put_mode(PutMode::Manual);
    let store = sqlite_store().await;

    let http = ScriptedHttpClient::new(&["202 MEDIA INFO OK"]);
    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        http,
        scanner_settings_for(Some(SCANNER_HOST)),
    );

    worker.warmup().unwrap();
    let running = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.do_work(copy_step("a.mov", 100)).await })
    };

    wait_for_pending(&target).await;

    // Observable mid-flight state.
    assert!(worker.busy());
    let step = worker.current_step().unwrap();
    assert_eq!(step.file.name, "a.mov");
    assert_eq!(step.status, WorkStepStatus::Working);
    assert!(worker.last_begin_step().is_some());

    // A second assignment fails without waiting for the first.
    let second = worker.do_work(copy_step("b.mov", 50)).await;
    assert!(matches!(
        second,
        Err(SyncError::InvalidWorkerTransition { .. })
    ));

    target.take_pending().succeed();
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, WorkStepStatus::Done);
}

#[tokio::test]
async fn progress_is_clamped_and_monotone() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.set_put_mode(PutMode::Manual);
    let store = sqlite_store().await;

    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let running = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.do_work(copy_step("a.mov", 100)).await })
    };

    wait_for_pending(&target).await;

    for value in [0.5, 0.2, 0.7] {
        worker.report_progress(value);
    }
    assert_eq!(worker.current_step().unwrap().progress, 0.7);

    // Out-of-range values are clamped, and the stored value never regresses.
    worker.report_progress(7.5);
    assert_eq!(worker.current_step().unwrap().progress, 1.0);
    worker.report_progress(0.9);
    assert_eq!(worker.current_step().unwrap().progress, 1.0);

    target.take_pending().succeed();
    running.await.unwrap().unwrap();

    // Reporting while idle is a silent no-op.
    worker.report_progress(0.3);
    assert!(worker.current_step().is_none());
}

#[tokio::test]
async fn failed_copy_short_circuits_the_composite() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.set_put_mode(PutMode::Fail("disk full".to_string()));
    let store = sqlite_store().await;

    let http = ScriptedHttpClient::new(&[]);
    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        http.clone(),
        scanner_settings_for(Some(SCANNER_HOST)),
    );

    worker.warmup().unwrap();
    let result = worker.do_work(copy_step("a.mov", 100)).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Error);
    assert!(result.messages.iter().any(|m| m.contains("disk full")));

    // The metadata phase never ran.
    assert!(http.calls().is_empty());
    assert!(!target.contains("a.mov"));
    assert!(!worker.busy());
}

#[tokio::test]
async fn skipped_scan_makes_the_composite_skipped() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    let store = sqlite_store().await;
    store
        .put(&TrackedMediaItem::new(
            "a.mov",
            SOURCE_ID,
            Utc::now().timestamp_millis(),
        ))
        .await
        .unwrap();

    // Copy succeeds, but no scanner is configured.
    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let result = worker.do_work(copy_step("a.mov", 100)).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Skipped);
    // The copy itself happened and was recorded.
    assert!(target.contains("a.mov"));
    let tracked = store.get_by_name("a.mov").await.unwrap().unwrap();
    assert!(tracked.has_target(TARGET_ID));
}

#[tokio::test]
async fn copy_success_with_no_tracking_leaves_index_untouched() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    let store = sqlite_store().await;

    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let result = worker.do_work(copy_step("ghost.mov", 10)).await.unwrap();

    // The replica lands, the index stays empty: the no-op upsert is the
    // documented behaviour for files whose tracking disappeared meanwhile.
    assert_eq!(result.status, WorkStepStatus::Skipped);
    assert!(target.contains("ghost.mov"));
    assert!(store.get_by_name("ghost.mov").await.unwrap().is_none());
}

#[tokio::test]
async fn abort_during_copy_phase_cancels_the_upload() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.set_put_mode(PutMode::Manual);
    let store = sqlite_store().await;

    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let running = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.do_work(copy_step("a.mov", 100)).await })
    };

    wait_for_pending(&target).await;
    let pending = target.take_pending();
    assert!(!pending.token.is_cancelled());

    worker.try_to_abort();
    assert!(pending.token.is_cancelled());

    // The transfer observes its token and settles cancelled.
    pending.settle_cancelled();

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, WorkStepStatus::Error);
    assert!(!worker.busy());
}

#[tokio::test]
async fn abort_after_copy_phase_is_a_no_op() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.set_put_mode(PutMode::Manual);
    let store = sqlite_store().await;
    store
        .put(&TrackedMediaItem::new(
            "a.mov",
            SOURCE_ID,
            Utc::now().timestamp_millis(),
        ))
        .await
        .unwrap();

    // The gated client parks the worker inside the media-scan phase.
    let http = GatedHttpClient::new("202 MEDIA INFO OK");
    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        http.clone(),
        scanner_settings_for(Some(SCANNER_HOST)),
    );

    worker.warmup().unwrap();
    let running = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.do_work(copy_step("a.mov", 100)).await })
    };

    wait_for_pending(&target).await;
    let pending = target.take_pending();
    let upload_token = pending.token.clone();
    pending.succeed();

    // Wait until the worker is inside the scan phase, then try to abort.
    http.entered.notified().await;
    worker.try_to_abort();

    // The abort slot was cleared when the copy settled: nothing is cancelled.
    assert!(!upload_token.is_cancelled());

    http.open_gate();
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, WorkStepStatus::Done);
}

#[tokio::test]
async fn delete_removes_replica_and_target_record() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.insert_file(StorageFile::new("a.mov", 100));
    let store = sqlite_store().await;

    let mut tracked = TrackedMediaItem::new("a.mov", SOURCE_ID, Utc::now().timestamp_millis());
    tracked.add_target(TARGET_ID);
    store.put(&tracked).await.unwrap();

    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let result = worker.do_work(delete_step("a.mov", 100)).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Done);
    assert!(!target.contains("a.mov"));

    let after = store.get_by_name("a.mov").await.unwrap().unwrap();
    assert!(!after.has_target(TARGET_ID));
}

#[tokio::test]
async fn delete_with_tracking_already_gone_is_done() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.insert_file(StorageFile::new("a.mov", 100));
    let store = sqlite_store().await;

    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let result = worker.do_work(delete_step("a.mov", 100)).await.unwrap();

    // The generator already dropped the record; the desired state holds.
    assert_eq!(result.status, WorkStepStatus::Done);
    assert!(!target.contains("a.mov"));
}

#[tokio::test]
async fn delete_handler_failure_is_an_error_result() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    let store = sqlite_store().await;

    let worker = build_worker(
        watch_pair(source, target),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    worker.warmup().unwrap();
    let result = worker.do_work(delete_step("missing.mov", 1)).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Error);
    assert!(!worker.busy());
}

#[tokio::test]
async fn generate_thumbnail_addresses_clip_under_media_path() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    let store = sqlite_store().await;

    let storages = AvailableStorages::from_objects([
        StorageObject {
            id: SOURCE_ID.to_string(),
            handler: source,
            watch_folder: true,
            watch_folder_target_id: Some(TARGET_ID.to_string()),
            media_path: None,
        },
        StorageObject {
            id: TARGET_ID.to_string(),
            handler: target,
            watch_folder: false,
            watch_folder_target_id: None,
            media_path: Some("playout-media".to_string()),
        },
    ]);

    let http = ScriptedHttpClient::new(&["202 THUMBNAIL OK"]);
    let worker = build_worker(
        storages,
        &store,
        http.clone(),
        scanner_settings_for(Some(SCANNER_HOST)),
    );

    worker.warmup().unwrap();
    let step = WorkStep::new(
        WorkStepAction::GenerateThumbnail,
        StorageFile::new("clips/a.mov", 100),
        TARGET_ID,
        MIRROR_STEP_PRIORITY,
    );
    let result = worker.do_work(step).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Done);
    let calls = http.calls();
    assert_eq!(calls.len(), 1);
    // media_path prefix plus the extension-less clip id, URL-encoded.
    assert!(calls[0]
        .1
        .ends_with("/thumbnail/generateAsync/playout-media%2Fclips%2Fa"));
}

#[tokio::test]
async fn scanner_failure_body_fails_the_step() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    let store = sqlite_store().await;

    let http = ScriptedHttpClient::new(&["500 scan worker crashed"]);
    let worker = build_worker(
        watch_pair(source, target),
        &store,
        http,
        scanner_settings_for(Some(SCANNER_HOST)),
    );

    worker.warmup().unwrap();
    let step = WorkStep::new(
        WorkStepAction::Scan,
        StorageFile::new("a.mov", 100),
        TARGET_ID,
        MIRROR_STEP_PRIORITY,
    );
    let result = worker.do_work(step).await.unwrap();

    assert_eq!(result.status, WorkStepStatus::Error);
    assert_eq!(result.messages, vec!["500 scan worker crashed".to_string()]);
}

#[tokio::test]
async fn all_waiters_resolve_when_the_step_settles() {
    let source = MemoryStorageHandler::new();
    let target = MemoryStorageHandler::new();
    target.set_put_mode(PutMode::Manual);
    let store = sqlite_store().await;

    let worker = build_worker(
        watch_pair(source, target.clone()),
        &store,
        ScriptedHttpClient::new(&[]),
        scanner_settings_for(None),
    );

    // Waiting while idle resolves immediately.
    worker.wait_until_finished().await;

    worker.warmup().unwrap();
    let running = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.do_work(copy_step("a.mov", 100)).await })
    };

    wait_for_pending(&target).await;

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.wait_until_finished().await })
        })
        .collect();

    target.take_pending().succeed();
    running.await.unwrap().unwrap();

    for waiter in waiters {
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("waiter did not resolve")
            .unwrap();
    }
}
