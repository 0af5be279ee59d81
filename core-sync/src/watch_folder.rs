//! # Watch-Folder Reconciler
//!
//! The concrete policy for watch-folder storages: keep the configured target
//! storage a mirror of the source.
//!
//! ## Behaviour
//!
//! - **add / change** — identical handling: make sure the file is tracked,
//!   probe the target, and emit a COPY work-flow when the mirror is missing
//!   or its size differs. Size comparison is a cheap proxy for "already
//!   synced"; same-name/same-size collisions across versions are accepted.
//! - **delete** — for a tracked file deleted on its *source*, emit one DELETE
//!   work-flow per target storage that holds a replica, then drop the
//!   tracking record. Deletes observed on non-source storages are ignored.
//! - **initial check** — at start-up, reconcile every file on the storage in
//!   parallel, then sweep tracking records the scan did not see into
//!   synthetic delete events. The sweep only starts once every per-file
//!   reconciliation has settled; otherwise a slow write could leave its
//!   record with an old `last_seen` and be swept by mistake.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{StorageEvent, StorageFile};
use chrono::Utc;
use core_runtime::{CoreEvent, StorageObject, SyncEvent};
use futures_util::future::join_all;
use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};
use crate::generator::{GeneratorContext, GeneratorPolicy};
use crate::workflow::{
    WorkStep, WorkStepAction, Workflow, WorkflowSource, MIRROR_STEP_PRIORITY,
};

/// Policy mirroring each watch-folder storage into its configured target.
#[derive(Debug, Default)]
pub struct WatchFolderPolicy;

impl WatchFolderPolicy {
    pub fn new() -> Self {
        Self
    }

    fn resolve_target(
        cx: &GeneratorContext,
        storage: &StorageObject,
    ) -> Result<Arc<StorageObject>> {
        let target_id = storage
            .watch_folder_target_id
            .as_deref()
            .ok_or_else(|| SyncError::MissingWatchTarget(storage.id.clone()))?;

        cx.storages()
            .get(target_id)
            .ok_or_else(|| SyncError::UnknownStorage(target_id.to_string()))
    }

    /// Steps mirroring a new or changed file onto the target.
    fn generate_new_file_work_steps(file: &StorageFile, target: &StorageObject) -> Vec<WorkStep> {
        vec![WorkStep::new(
            WorkStepAction::Copy,
            file.clone(),
            target.id.clone(),
            MIRROR_STEP_PRIORITY,
        )]
    }

    /// Steps removing a replicated file from the target.
    fn generate_delete_file_work_steps(
        file: &StorageFile,
        target: &StorageObject,
    ) -> Vec<WorkStep> {
        vec![WorkStep::new(
            WorkStepAction::Delete,
            file.clone(),
            target.id.clone(),
            MIRROR_STEP_PRIORITY,
        )]
    }

    /// Shared add/change handling.
    async fn on_file_updated(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        initial_scan: bool,
    ) -> Result<()> {
        let target = Self::resolve_target(cx, storage)?;

        let Some(local_file) = event.file.as_ref() else {
            warn!(path = %event.path, kind = %event.kind, "Update event without a file; ignoring");
            return Ok(());
        };

        // Make sure the file is tracked before any mirroring work is queued.
        match cx.store().get_by_name(&event.path).await {
            Ok(Some(_)) => {
                debug!(path = %event.path, "File already tracked");
            }
            Ok(None) => {
                if let Err(e) = cx.register_file(local_file, storage).await {
                    error!(path = %event.path, error = %e, "Failed to register file for tracking; not queueing a copy");
                    return Ok(());
                }
            }
            Err(e) => {
                error!(path = %event.path, error = %e, "Tracking lookup failed; not queueing a copy");
                return Ok(());
            }
        }

        // A target fetch failure means the mirror is missing; that is not an
        // error here, it is exactly the condition a copy repairs.
        let needs_copy = match target.handler.get_file(&local_file.name).await {
            Err(_) => true,
            Ok(mirrored) => mirrored.properties().size != local_file.properties().size,
        };

        if !needs_copy {
            debug!(
                path = %event.path,
                target = %target.id,
                initial_scan,
                "Mirror already holds a same-size replica; nothing to do"
            );
            return Ok(());
        }

        let steps = Self::generate_new_file_work_steps(local_file, &target);
        let workflow = Workflow::new(&event.path, WorkflowSource::LocalMediaItem, steps);
        cx.dispatch_workflow(workflow, storage);
        Ok(())
    }

    /// Shared delete handling (live events and scan-synthesised ones).
    async fn on_file_deleted(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
    ) -> Result<()> {
        let tracked = match cx.store().get_by_name(&event.path).await {
            Ok(tracked) => tracked,
            Err(e) => {
                error!(path = %event.path, error = %e, "Tracking lookup failed on delete");
                return Ok(());
            }
        };

        let Some(tracked) = tracked else {
            debug!(path = %event.path, "Untracked file deleted; nothing to mirror");
            return Ok(());
        };

        if tracked.source_storage_id != storage.id {
            // The replica disappeared on a sibling storage. Regenerating it
            // from the true source is not implemented; the next change event
            // or initial scan on the source repairs the mirror.
            debug!(
                path = %event.path,
                source = %tracked.source_storage_id,
                observed_on = %storage.id,
                "Delete came from a non-source storage; ignoring"
            );
            return Ok(());
        }

        for target_id in &tracked.target_storage_ids {
            let Some(target) = cx.storages().get(target_id) else {
                warn!(path = %tracked.name, target = %target_id, "Target storage not available; skipping mirror delete");
                continue;
            };

            match target.handler.get_file(&tracked.name).await {
                Ok(file) => {
                    let steps = Self::generate_delete_file_work_steps(&file, &target);
                    let workflow =
                        Workflow::new(&tracked.name, WorkflowSource::LocalMediaItem, steps);
                    cx.dispatch_workflow(workflow, storage);
                }
                Err(e) => {
                    warn!(
                        path = %tracked.name,
                        target = %target_id,
                        error = %e,
                        "Could not fetch replica for delete; skipping this target"
                    );
                }
            }
        }

        // The record goes away immediately; the queued DELETE flows only
        // carry intent, and a re-added file re-creates tracking from scratch.
        if let Err(e) = cx.store().remove(&tracked.name).await {
            error!(path = %tracked.name, error = %e, "Failed to remove tracking record");
        }
        Ok(())
    }

    async fn reconcile_file(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        target: &Arc<StorageObject>,
        file: StorageFile,
        scan_time: i64,
    ) {
        match cx.store().get_by_name(&file.name).await {
            Ok(Some(mut tracked)) if tracked.source_storage_id == storage.id => {
                tracked.last_seen = tracked.last_seen.max(scan_time);
                if let Err(e) = cx.store().put(&tracked).await {
                    error!(path = %tracked.name, error = %e, "Failed to refresh last_seen");
                    return;
                }

                // Log-only probe: a missing mirror at start-up is repaired by
                // the next change event or a manual resync, not by the scan.
                if let Err(e) = target.handler.get_file(&tracked.name).await {
                    error!(
                        path = %tracked.name,
                        target = %target.id,
                        error = %e,
                        "Tracked file has no replica on the target"
                    );
                }
            }
            Ok(Some(_)) => {
                // Tracked for a different source storage; not ours to manage.
            }
            Ok(None) => {
                let event = StorageEvent::added(file);
                if let Err(e) = self.on_file_updated(cx, storage, &event, true).await {
                    error!(path = %event.path, error = %e, "Failed to reconcile untracked file");
                }
            }
            Err(e) => {
                error!(path = %file.name, error = %e, "Tracking lookup failed during initial scan");
            }
        }
    }
}

#[async_trait]
impl GeneratorPolicy for WatchFolderPolicy {
    fn selects(&self, storage: &StorageObject) -> bool {
        storage.watch_folder
    }

    async fn on_add(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        initial_scan: bool,
    ) -> Result<()> {
        self.on_file_updated(cx, storage, event, initial_scan).await
    }

    async fn on_change(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        initial_scan: bool,
    ) -> Result<()> {
        self.on_file_updated(cx, storage, event, initial_scan).await
    }

    async fn on_delete(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        _initial_scan: bool,
    ) -> Result<()> {
        self.on_file_deleted(cx, storage, event).await
    }

    async fn initial_check(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
    ) -> Result<()> {
        // Captured once, before enumeration: files whose per-file persistence
        // overlaps the scan must not mark themselves stale.
        let scan_time = Utc::now().timestamp_millis();

        let target = Self::resolve_target(cx, storage)?;

        cx.events()
            .emit(CoreEvent::Sync(SyncEvent::InitialScanStarted {
                storage_id: storage.id.clone(),
            }))
            .ok();

        let files = storage.handler.get_all_files().await.map_err(SyncError::from)?;
        let files_seen = files.len() as u64;
        debug!(storage = %storage.id, files = files_seen, "Initial scan enumerated storage");

        // Fan out per file; the sweep below must not start until every
        // reconciliation has settled.
        join_all(
            files
                .into_iter()
                .map(|file| self.reconcile_file(cx, storage, &target, file, scan_time)),
        )
        .await;

        let stale = cx
            .store()
            .stale_in_storage(&storage.id, scan_time)
            .await
            .map_err(SyncError::from)?;
        let stale_swept = stale.len() as u64;

        for item in stale {
            debug!(path = %item.name, storage = %storage.id, "Tracked file missing from source; synthesising delete");
            let event = StorageEvent::deleted(item.name.clone());
            if let Err(e) = self.on_file_deleted(cx, storage, &event).await {
                error!(path = %item.name, error = %e, "Failed to sweep stale tracking record");
            }
        }

        cx.events()
            .emit(CoreEvent::Sync(SyncEvent::InitialScanCompleted {
                storage_id: storage.id.clone(),
                files_seen,
                stale_swept,
            }))
            .ok();

        Ok(())
    }
}
