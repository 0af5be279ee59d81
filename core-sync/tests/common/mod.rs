//! Shared fixtures for the integration tests: an in-memory storage handler
//! with scriptable upload behaviour, scripted HTTP clients for the scanner,
//! and wiring helpers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    HttpClient, HttpMethod, HttpRequest, HttpResponse, ProgressFn, StorageEvent, StorageFile,
    StorageHandler, UploadHandle,
};
use bytes::Bytes;
use core_index::{create_test_pool, SqliteTrackedMediaStore, TrackedMediaStore};
use core_runtime::{AvailableStorages, EventBus, MediaScannerSettings, StorageObject};
use core_sync::Workflow;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

// ============================================================================
// In-memory storage handler
// ============================================================================

type FileMap = Arc<Mutex<HashMap<String, StorageFile>>>;

/// How `put_file` behaves on this handler.
#[derive(Clone)]
pub enum PutMode {
    /// Uploads land immediately and succeed.
    Instant,
    /// Uploads fail immediately with this message.
    Fail(String),
    /// Uploads park as [`PendingUpload`]s until the test settles them.
    Manual,
}

/// A parked upload the test controls.
pub struct PendingUpload {
    pub file: StorageFile,
    pub token: CancellationToken,
    pub progress: Option<ProgressFn>,
    completion: oneshot::Sender<BridgeResult<()>>,
    files: FileMap,
}

impl PendingUpload {
    /// Land the file on the storage and report success.
    pub fn succeed(self) {
        lock(&self.files).insert(self.file.name.clone(), self.file.clone());
        self.completion.send(Ok(())).ok();
    }

    /// Report failure without landing the file.
    pub fn fail(self, message: &str) {
        self.completion
            .send(Err(BridgeError::OperationFailed(message.to_string())))
            .ok();
    }

    /// Report that the transfer observed its cancellation token.
    pub fn settle_cancelled(self) {
        self.completion.send(Err(BridgeError::Cancelled)).ok();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable in-memory [`StorageHandler`].
pub struct MemoryStorageHandler {
    files: FileMap,
    events: broadcast::Sender<StorageEvent>,
    put_mode: Mutex<PutMode>,
    pending: Mutex<Vec<PendingUpload>>,
}

impl MemoryStorageHandler {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            events,
            put_mode: Mutex::new(PutMode::Instant),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn set_put_mode(&self, mode: PutMode) {
        *lock(&self.put_mode) = mode;
    }

    /// Pre-populate a file without emitting an event.
    pub fn insert_file(&self, file: StorageFile) {
        lock(&self.files).insert(file.name.clone(), file);
    }

    pub fn remove_file(&self, name: &str) {
        lock(&self.files).remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.files).contains_key(name)
    }

    /// Take the oldest parked upload (panics when none is parked yet).
    pub fn take_pending(&self) -> PendingUpload {
        lock(&self.pending).remove(0)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Place the file on the storage and broadcast an add event.
    pub fn emit_add(&self, file: StorageFile) {
        self.insert_file(file.clone());
        self.events.send(StorageEvent::added(file)).ok();
    }

    /// Update the file on the storage and broadcast a change event.
    pub fn emit_change(&self, file: StorageFile) {
        self.insert_file(file.clone());
        self.events.send(StorageEvent::changed(file)).ok();
    }

    /// Drop the file from the storage and broadcast a delete event.
    pub fn emit_delete(&self, name: &str) {
        self.remove_file(name);
        self.events.send(StorageEvent::deleted(name)).ok();
    }
}

#[async_trait]
impl StorageHandler for MemoryStorageHandler {
    async fn get_all_files(&self) -> BridgeResult<Vec<StorageFile>> {
        Ok(lock(&self.files).values().cloned().collect())
    }

    async fn get_file(&self, name: &str) -> BridgeResult<StorageFile> {
        lock(&self.files)
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    async fn put_file(
        &self,
        file: &StorageFile,
        progress: Option<ProgressFn>,
    ) -> BridgeResult<UploadHandle> {
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        match lock(&self.put_mode).clone() {
            PutMode::Instant => {
                if let Some(progress) = progress {
                    progress(1.0);
                }
                lock(&self.files).insert(file.name.clone(), file.clone());
                tx.send(Ok(())).ok();
            }
            PutMode::Fail(message) => {
                tx.send(Err(BridgeError::OperationFailed(message))).ok();
            }
            PutMode::Manual => {
                lock(&self.pending).push(PendingUpload {
                    file: file.clone(),
                    token: token.clone(),
                    progress,
                    completion: tx,
                    files: Arc::clone(&self.files),
                });
            }
        }

        Ok(UploadHandle::new(token, rx))
    }

    async fn delete_file(&self, file: &StorageFile) -> BridgeResult<()> {
        lock(&self.files)
            .remove(&file.name)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound(file.name.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Scripted HTTP clients
// ============================================================================

/// Returns canned plain-text bodies in order and records every call.
pub struct ScriptedHttpClient {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(HttpMethod, String)>>,
}

impl ScriptedHttpClient {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(HttpMethod, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        lock(&self.calls).push((request.method, request.url.clone()));

        let body = lock(&self.replies)
            .pop_front()
            .expect("scripted client ran out of replies");

        Ok(HttpResponse {
            status: 200,
            headers: Default::default(),
            body: Bytes::from(body),
        })
    }
}

/// Blocks every request until the test opens the gate; used to hold a worker
/// inside its scanner phase.
pub struct GatedHttpClient {
    pub entered: Arc<tokio::sync::Notify>,
    gate: Arc<tokio::sync::Semaphore>,
    reply: String,
}

impl GatedHttpClient {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            entered: Arc::new(tokio::sync::Notify::new()),
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            reply: reply.to_string(),
        })
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl HttpClient for GatedHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| BridgeError::OperationFailed("gate closed".to_string()))?;

        Ok(HttpResponse {
            status: 200,
            headers: Default::default(),
            body: Bytes::from(self.reply.clone()),
        })
    }
}

// ============================================================================
// Wiring helpers
// ============================================================================

pub const SOURCE_ID: &str = "ingest";
pub const TARGET_ID: &str = "playout";

pub async fn sqlite_store() -> Arc<SqliteTrackedMediaStore> {
    let pool = create_test_pool().await.unwrap();
    let store = SqliteTrackedMediaStore::new(pool);
    store.initialize().await.unwrap();
    Arc::new(store)
}

pub fn store_as_dyn(store: &Arc<SqliteTrackedMediaStore>) -> Arc<dyn TrackedMediaStore> {
    Arc::clone(store) as Arc<dyn TrackedMediaStore>
}

/// A watch-folder source mirrored into a target.
pub fn watch_pair(
    source: Arc<MemoryStorageHandler>,
    target: Arc<MemoryStorageHandler>,
) -> AvailableStorages {
    AvailableStorages::from_objects([
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
            media_path: None,
        },
    ])
}

pub fn scanner_settings_for(host: Option<&str>) -> MediaScannerSettings {
    MediaScannerSettings {
        host: host.map(|h| h.to_string()),
        port: 8000,
    }
}

pub fn event_bus() -> EventBus {
    EventBus::new(256)
}

/// Await the next work-flow with a timeout.
pub async fn recv_workflow(receiver: &mut broadcast::Receiver<Workflow>) -> Workflow {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for a work-flow")
        .expect("work-flow channel closed")
}

/// Assert that no work-flow arrives within a settling window.
pub async fn assert_no_workflow(receiver: &mut broadcast::Receiver<Workflow>) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    match receiver.try_recv() {
        Err(broadcast::error::TryRecvError::Empty) => {}
        Ok(workflow) => panic!("unexpected work-flow emitted: {}", workflow.id),
        Err(e) => panic!("work-flow channel in unexpected state: {}", e),
    }
}

/// Give the generator's pump tasks a moment to process queued events.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Wait until the handler has parked an upload (manual put mode).
pub async fn wait_for_pending(handler: &MemoryStorageHandler) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handler.pending_count() == 0 {
        if tokio::time::Instant::now() > deadline {
            panic!("no upload was parked in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
