//! # Worker
//!
//! Executes one work-step at a time: copy (cancellable, with progress),
//! delete, and the scanner-backed generation steps.
//!
//! ## Lifecycle
//!
//! ```text
//! idle --warmup()--> warming_up --do_work(step)--> working
//! working --(result | failure)--> idle          (resolves finish waiters)
//! warming_up --cooldown()--> idle
//! ```
//!
//! The dispatcher reserves a worker with [`warmup`], hands it exactly one
//! step with [`do_work`] and observes `busy`/`current_step` from outside.
//! Misuse of that handshake (warming twice, assigning without warm-up,
//! assigning while working) is a contract violation and fails synchronously
//! with a typed error; everything that goes wrong *executing* a step resolves
//! to a [`WorkResult`] instead — the dispatcher never sees a worker throw.
//!
//! A COPY step is composite: the copy phase is followed by a media-info scan
//! of the new replica. Cancellation via [`try_to_abort`] only covers the copy
//! phase; the abort slot is cleared the moment the copy settles.
//!
//! [`warmup`]: Worker::warmup
//! [`do_work`]: Worker::do_work
//! [`try_to_abort`]: Worker::try_to_abort

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use core_index::TrackedMediaStore;
use core_runtime::{AvailableStorages, CoreEvent, EventBus, WorkerEvent};
use bridge_traits::ProgressFn;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};
use crate::scanner::{MediaScannerClient, ScanKind, ScanOutcome};
use crate::workflow::{WorkResult, WorkStep, WorkStepAction, WorkStepStatus};

#[derive(Default)]
struct WorkerState {
    working: bool,
    warming_up: bool,
    step: Option<WorkStep>,
    last_begin_step: Option<i64>,
}

impl WorkerState {
    fn phase(&self) -> &'static str {
        if self.working {
            "working"
        } else if self.warming_up {
            "warming_up"
        } else {
            "idle"
        }
    }
}

/// A worker executing one work-step at a time.
///
/// Shared as `Arc<Worker>`: the dispatcher drives `do_work` while other
/// tasks observe `busy`, abort the copy phase or await completion.
pub struct Worker {
    storages: AvailableStorages,
    store: Arc<dyn TrackedMediaStore>,
    scanner: Arc<MediaScannerClient>,
    events: EventBus,
    state: Arc<Mutex<WorkerState>>,
    abort: Mutex<Option<CancellationToken>>,
    waiters: Mutex<Vec<oneshot::Sender<()>>>,
}

impl Worker {
    pub fn new(
        storages: AvailableStorages,
        store: Arc<dyn TrackedMediaStore>,
        scanner: Arc<MediaScannerClient>,
        events: EventBus,
    ) -> Self {
        Self {
            storages,
            store,
            scanner,
            events,
            state: Arc::new(Mutex::new(WorkerState::default())),
            abort: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve this worker for an imminent step assignment.
    ///
    /// # Errors
    ///
    /// Warming a worker that is already warming or working is a dispatcher
    /// contract violation.
    pub fn warmup(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.warming_up || state.working {
            return Err(SyncError::InvalidWorkerTransition {
                from: state.phase().to_string(),
                to: "warming_up".to_string(),
                reason: "worker is not idle".to_string(),
            });
        }
        state.warming_up = true;
        Ok(())
    }

    /// Rescind a warm-up before a step arrives. Safe to call when not
    /// warming.
    pub fn cooldown(&self) {
        self.lock_state().warming_up = false;
    }

    /// Externally observed busy state: working or reserved.
    pub fn busy(&self) -> bool {
        let state = self.lock_state();
        state.working || state.warming_up
    }

    /// The step currently being executed; `None` unless working.
    pub fn current_step(&self) -> Option<WorkStep> {
        let state = self.lock_state();
        if state.working {
            state.step.clone()
        } else {
            None
        }
    }

    /// When the current step began (Unix millis); `None` unless working.
    pub fn last_begin_step(&self) -> Option<i64> {
        let state = self.lock_state();
        if state.working {
            state.last_begin_step
        } else {
            None
        }
    }

    /// Execute one step to completion.
    ///
    /// Requires a prior [`warmup`](Worker::warmup). Every execution failure —
    /// handler I/O, tracking writes, scanner replies — resolves to a
    /// `WorkResult` with status `Error`; the returned `Err` is reserved for
    /// dispatcher contract violations.
    pub async fn do_work(&self, mut step: WorkStep) -> Result<WorkResult> {
        {
            let mut state = self.lock_state();
            if state.working {
                return Err(SyncError::InvalidWorkerTransition {
                    from: "working".to_string(),
                    to: "working".to_string(),
                    reason: "a step is already in progress".to_string(),
                });
            }
            if !state.warming_up {
                return Err(SyncError::InvalidWorkerTransition {
                    from: "idle".to_string(),
                    to: "working".to_string(),
                    reason: "do_work without warmup".to_string(),
                });
            }

            step.begin()?;
            state.warming_up = false;
            state.working = true;
            state.last_begin_step = Some(Utc::now().timestamp_millis());
            state.step = Some(step.clone());
        }

        debug!(action = %step.action, path = %step.file.name, "Work-step started");
        self.events
            .emit(CoreEvent::Worker(WorkerEvent::StepStarted {
                action: step.action.as_str().to_string(),
                file: step.file.name.clone(),
            }))
            .ok();

        let result = self.execute(&step).await;

        self.settle(&step, &result);
        Ok(result)
    }

    /// Release busy state, record the final status and resolve waiters.
    fn settle(&self, step: &WorkStep, result: &WorkResult) {
        let waiters = {
            let mut state = self.lock_state();
            if let Some(mut current) = state.step.take() {
                current.finish(result.status).ok();
            }
            state.working = false;
            state.last_begin_step = None;

            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *waiters)
        };

        self.clear_abort();

        for waiter in waiters {
            waiter.send(()).ok();
        }

        debug!(
            action = %step.action,
            path = %step.file.name,
            status = %result.status,
            "Work-step finished"
        );
        self.events
            .emit(CoreEvent::Worker(WorkerEvent::StepFinished {
                action: step.action.as_str().to_string(),
                file: step.file.name.clone(),
                status: result.status.as_str().to_string(),
                messages: result.messages.clone(),
            }))
            .ok();
    }

    async fn execute(&self, step: &WorkStep) -> WorkResult {
        match step.action {
            WorkStepAction::Copy => {
                let copied = self.do_copy(step).await;
                if copied.status != WorkStepStatus::Done {
                    return copied;
                }
                // Leaving the copy phase: cancellation no longer applies.
                self.clear_abort();
                self.do_scan_media(step).await
            }
            WorkStepAction::Delete => self.do_delete(step).await,
            WorkStepAction::Scan => self.do_scan_media(step).await,
            WorkStepAction::GenerateMetadata => self.do_generate(step, ScanKind::Metadata).await,
            WorkStepAction::GeneratePreview => self.do_generate(step, ScanKind::Preview).await,
            WorkStepAction::GenerateThumbnail => self.do_generate(step, ScanKind::Thumbnail).await,
        }
    }

    async fn do_copy(&self, step: &WorkStep) -> WorkResult {
        let Some(target) = self.storages.get(&step.target_storage_id) else {
            return self.fail_step(format!(
                "target storage '{}' is not available",
                step.target_storage_id
            ));
        };

        let upload = match target
            .handler
            .put_file(&step.file, Some(self.progress_sink()))
            .await
        {
            Ok(upload) => upload,
            Err(e) => return self.fail_step(format!("copy failed to start: {}", e)),
        };

        self.set_abort(upload.cancellation());

        if let Err(e) = upload.finish().await {
            return self.fail_step(format!("copy failed: {}", e));
        }

        // Record the replication; a file whose tracking disappeared while the
        // copy ran stays untracked on purpose.
        let target_id = target.id.clone();
        let recorded = self
            .store
            .upsert(
                &step.file.name,
                Box::new(move |item| {
                    item.map(|mut item| {
                        item.add_target(&target_id);
                        item
                    })
                }),
            )
            .await;

        match recorded {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(path = %step.file.name, "Copy finished for an untracked file; tracking left untouched");
            }
            Err(e) => {
                return self.fail_step(format!("failed to record copy in tracking: {}", e));
            }
        }

        WorkResult::done()
    }

    async fn do_delete(&self, step: &WorkStep) -> WorkResult {
        let Some(target) = self.storages.get(&step.target_storage_id) else {
            return self.fail_step(format!(
                "target storage '{}' is not available",
                step.target_storage_id
            ));
        };

        if let Err(e) = target.handler.delete_file(&step.file).await {
            return self.fail_step(format!("delete failed: {}", e));
        }

        // An absent record means the tracking was already dropped (the
        // generator removes it when the source file goes away); the desired
        // state already holds.
        let target_id = target.id.clone();
        let path = step.file.name.clone();
        let recorded = self
            .store
            .upsert(
                &step.file.name,
                Box::new(move |item| match item {
                    None => {
                        debug!(path = %path, "Tracking already removed; delete considered complete");
                        None
                    }
                    Some(mut item) => {
                        if !item.remove_target(&target_id) {
                            warn!(
                                path = %item.name,
                                target = %target_id,
                                "Delete finished for a target not recorded in tracking"
                            );
                        }
                        Some(item)
                    }
                }),
            )
            .await;

        match recorded {
            Ok(_) => WorkResult::done(),
            Err(e) => self.fail_step(format!("failed to record delete in tracking: {}", e)),
        }
    }

    /// Media-info scan of the step's file (used standalone and as the second
    /// phase of a COPY).
    async fn do_scan_media(&self, step: &WorkStep) -> WorkResult {
        let id = MediaScannerClient::media_path_id(&step.file.name);
        self.scan_outcome(self.scanner.generate(ScanKind::MediaInfo, &id).await)
    }

    async fn do_generate(&self, step: &WorkStep, kind: ScanKind) -> WorkResult {
        let media_path = self
            .storages
            .get(&step.target_storage_id)
            .and_then(|target| target.media_path.clone());
        let id = MediaScannerClient::clip_id(&step.file.name, media_path.as_deref());
        self.scan_outcome(self.scanner.generate(kind, &id).await)
    }

    fn scan_outcome(&self, outcome: ScanOutcome) -> WorkResult {
        match outcome {
            ScanOutcome::Done => WorkResult::done(),
            ScanOutcome::Skipped(reason) => {
                debug!(reason = %reason, "Scanner step skipped");
                WorkResult::skipped(reason)
            }
            ScanOutcome::Failed(reason) => self.fail_step(reason),
        }
    }

    fn fail_step(&self, reason: String) -> WorkResult {
        error!(reason = %reason, "Work-step failed");
        WorkResult::error(reason)
    }

    /// Report copy progress. Clamped to `[0, 1]`; silently ignored when not
    /// working; persisted only when strictly above the stored value, so late
    /// or reordered reports never move progress backwards.
    pub fn report_progress(&self, value: f32) {
        Self::record_progress(&self.state, value);
    }

    fn record_progress(state: &Arc<Mutex<WorkerState>>, value: f32) {
        let clamped = value.clamp(0.0, 1.0);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.working {
            return;
        }
        if let Some(step) = state.step.as_mut() {
            if clamped > step.progress {
                step.progress = clamped;
            }
        }
    }

    fn progress_sink(&self) -> ProgressFn {
        let state = Arc::clone(&self.state);
        Arc::new(move |value: f32| Self::record_progress(&state, value))
    }

    fn set_abort(&self, token: CancellationToken) {
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn clear_abort(&self) {
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Fire the current abort handler, if any.
    ///
    /// Only the copy phase of a COPY step installs one; aborting at any other
    /// time is a no-op. Callers observe the outcome through
    /// [`wait_until_finished`](Worker::wait_until_finished).
    pub fn try_to_abort(&self) {
        if !self.busy() {
            return;
        }
        let token = self
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(token) = token {
            debug!("Aborting current copy phase");
            token.cancel();
        }
    }

    /// Resolve when the in-flight [`do_work`](Worker::do_work) settles.
    ///
    /// Resolves immediately when no step is executing. All concurrent waiters
    /// are resolved by the same settlement.
    pub async fn wait_until_finished(&self) {
        let receiver = {
            let state = self.lock_state();
            if !state.working {
                return;
            }
            let (tx, rx) = oneshot::channel();
            self.waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tx);
            rx
        };
        receiver.await.ok();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Worker")
            .field("phase", &state.phase())
            .field(
                "step",
                &state.step.as_ref().map(|step| step.file.name.as_str()),
            )
            .finish()
    }
}
