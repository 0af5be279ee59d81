//! # Work-flow Generator Base
//!
//! Mediates between storage events and a reconciliation policy.
//!
//! ## Overview
//!
//! The generator owns the registration lifecycle: on [`init`] it selects the
//! storages its policy manages, subscribes to each handler's event stream,
//! spawns a pump task per storage that routes events to the policy hooks, and
//! then runs the policy's initial check. [`destroy`] cancels the pumps and
//! joins them.
//!
//! Produced [`Workflow`]s leave through a single broadcast channel
//! ([`WorkflowGenerator::subscribe`]); the dispatcher pairing steps with idle
//! workers is an external collaborator. Observability is split the usual way:
//! summary events go to the [`EventBus`], diagnostics go to `tracing`.
//!
//! Policies never propagate event-handling errors to the storage handler;
//! the pump logs them and keeps consuming.
//!
//! [`init`]: WorkflowGenerator::init
//! [`destroy`]: WorkflowGenerator::destroy

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{StorageEvent, StorageEventKind, StorageFile};
use chrono::Utc;
use core_index::{TrackedMediaItem, TrackedMediaStore};
use core_runtime::{AvailableStorages, CoreEvent, EventBus, StorageObject, SyncEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::workflow::Workflow;

/// Buffer for the NEW_WORKFLOW channel. A dispatcher that lags behind this
/// many flows is not keeping up with its worker pool.
const WORKFLOW_CHANNEL_CAPACITY: usize = 64;

/// Collaborators shared by the generator base and its policy hooks.
pub struct GeneratorContext {
    storages: AvailableStorages,
    store: Arc<dyn TrackedMediaStore>,
    events: EventBus,
    workflow_tx: broadcast::Sender<Workflow>,
}

impl GeneratorContext {
    pub fn storages(&self) -> &AvailableStorages {
        &self.storages
    }

    pub fn store(&self) -> &dyn TrackedMediaStore {
        self.store.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create and persist tracking for a newly sighted file.
    pub async fn register_file(
        &self,
        file: &StorageFile,
        storage: &StorageObject,
    ) -> Result<TrackedMediaItem> {
        let item = TrackedMediaItem::new(&file.name, &storage.id, Utc::now().timestamp_millis());
        self.store.put(&item).await?;
        debug!(path = %file.name, storage = %storage.id, "Registered file for tracking");
        Ok(item)
    }

    /// Hand a produced work-flow to the dispatcher channel.
    pub fn dispatch_workflow(&self, workflow: Workflow, storage: &StorageObject) {
        debug!(
            workflow_id = %workflow.id,
            storage = %storage.id,
            steps = workflow.steps.len(),
            "Dispatching work-flow"
        );

        self.events
            .emit(CoreEvent::Sync(SyncEvent::WorkflowCreated {
                workflow_id: workflow.id.to_string(),
                storage_id: storage.id.clone(),
                file: workflow
                    .steps
                    .first()
                    .map(|step| step.file.name.clone())
                    .unwrap_or_default(),
                step_count: workflow.steps.len() as u32,
            }))
            .ok();

        if self.workflow_tx.send(workflow).is_err() {
            warn!(storage = %storage.id, "No dispatcher subscribed; work-flow dropped");
        }
    }
}

impl std::fmt::Debug for GeneratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorContext")
            .field("storages", &self.storages.len())
            .finish()
    }
}

/// Reconciliation policy driven by the generator base.
///
/// Hooks receive the shared [`GeneratorContext`], the storage the event came
/// from and — for the update hooks — whether the event was synthesised by an
/// initial scan.
#[async_trait]
pub trait GeneratorPolicy: Send + Sync + 'static {
    /// Whether this policy manages `storage`.
    fn selects(&self, storage: &StorageObject) -> bool;

    async fn on_add(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        initial_scan: bool,
    ) -> Result<()>;

    async fn on_change(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        initial_scan: bool,
    ) -> Result<()>;

    async fn on_delete(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
        event: &StorageEvent,
        initial_scan: bool,
    ) -> Result<()>;

    /// Full reconciliation pass at start-up.
    async fn initial_check(
        &self,
        cx: &GeneratorContext,
        storage: &Arc<StorageObject>,
    ) -> Result<()>;
}

/// Generator driving one policy over the configured storages.
pub struct WorkflowGenerator {
    ctx: Arc<GeneratorContext>,
    policy: Arc<dyn GeneratorPolicy>,
    shutdown: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

impl WorkflowGenerator {
    pub fn new(
        storages: AvailableStorages,
        store: Arc<dyn TrackedMediaStore>,
        events: EventBus,
        policy: Arc<dyn GeneratorPolicy>,
    ) -> Self {
        let (workflow_tx, _) = broadcast::channel(WORKFLOW_CHANNEL_CAPACITY);
        Self {
            ctx: Arc::new(GeneratorContext {
                storages,
                store,
                events,
                workflow_tx,
            }),
            policy,
            shutdown: CancellationToken::new(),
            pumps: Vec::new(),
        }
    }

    /// The NEW_WORKFLOW channel.
    ///
    /// Subscribe before calling [`init`](WorkflowGenerator::init): flows
    /// emitted by the initial check are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Workflow> {
        self.ctx.workflow_tx.subscribe()
    }

    /// Register every storage the policy selects.
    ///
    /// For each storage: subscribe to its event stream, start the pump task,
    /// then run the policy's initial check.
    pub async fn init(&mut self) -> Result<()> {
        let selected: Vec<_> = self
            .ctx
            .storages
            .iter()
            .filter(|storage| self.policy.selects(storage))
            .cloned()
            .collect();

        debug!(count = selected.len(), "Registering storages");
        for storage in selected {
            self.register_storage(storage).await?;
        }
        Ok(())
    }

    async fn register_storage(&mut self, storage: Arc<StorageObject>) -> Result<()> {
        // Subscribe before the initial check so no event can fall between
        // enumeration and live observation.
        let receiver = storage.handler.subscribe();
        self.pumps.push(tokio::spawn(Self::pump_events(
            Arc::clone(&self.ctx),
            Arc::clone(&self.policy),
            Arc::clone(&storage),
            receiver,
            self.shutdown.clone(),
        )));

        self.ctx
            .events
            .emit(CoreEvent::Sync(SyncEvent::StorageRegistered {
                storage_id: storage.id.clone(),
            }))
            .ok();

        self.policy.initial_check(&self.ctx, &storage).await
    }

    async fn pump_events(
        ctx: Arc<GeneratorContext>,
        policy: Arc<dyn GeneratorPolicy>,
        storage: Arc<StorageObject>,
        mut receiver: broadcast::Receiver<StorageEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => Self::dispatch(&ctx, &policy, &storage, event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(storage = %storage.id, missed, "Storage event stream lagged; the next initial scan repairs what was missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(storage = %storage.id, "Storage event stream closed");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(
        ctx: &GeneratorContext,
        policy: &Arc<dyn GeneratorPolicy>,
        storage: &Arc<StorageObject>,
        event: StorageEvent,
    ) {
        debug!(storage = %storage.id, kind = %event.kind, path = %event.path, "Storage event");

        let outcome = match event.kind {
            StorageEventKind::Add => policy.on_add(ctx, storage, &event, false).await,
            StorageEventKind::Change => policy.on_change(ctx, storage, &event, false).await,
            StorageEventKind::Delete => policy.on_delete(ctx, storage, &event, false).await,
        };

        if let Err(e) = outcome {
            error!(
                storage = %storage.id,
                path = %event.path,
                error = %e,
                "Failed to handle storage event"
            );
        }
    }

    /// Unregister and release subscriptions.
    pub async fn destroy(&mut self) {
        self.shutdown.cancel();
        for pump in self.pumps.drain(..) {
            pump.await.ok();
        }
    }
}

impl std::fmt::Debug for WorkflowGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGenerator")
            .field("pumps", &self.pumps.len())
            .finish()
    }
}
