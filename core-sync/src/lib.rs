//! # Sync Core
//!
//! Work-flow generation from storage events, and the workers that execute
//! the resulting steps against storages, the tracked-media index and the
//! external media scanner.
//!
//! ## Components
//!
//! - **Work-flow model** (`workflow`): [`Workflow`], [`WorkStep`] and
//!   [`WorkResult`] value types with a validated status machine
//! - **Generator base** (`generator`): storage registration lifecycle, event
//!   pump tasks and the NEW_WORKFLOW channel, composed with a
//!   [`GeneratorPolicy`]
//! - **Watch-folder policy** (`watch_folder`): the concrete reconciler that
//!   mirrors each watch-folder storage into its target
//! - **Worker** (`worker`): executes one step at a time — cancellable copy
//!   with progress, delete, scanner-backed generation — and mutates the
//!   tracked-media index under per-key upsert discipline
//! - **Scanner client** (`scanner`): polling client for the asynchronous
//!   media-scanner HTTP service
//!
//! The dispatcher that pairs produced steps with idle workers is an external
//! collaborator: it consumes [`WorkflowGenerator::subscribe`] and drives
//! [`Worker::warmup`]/[`Worker::do_work`].

pub mod error;
pub mod generator;
pub mod scanner;
pub mod watch_folder;
pub mod worker;
pub mod workflow;

pub use error::{Result, SyncError};
pub use generator::{GeneratorContext, GeneratorPolicy, WorkflowGenerator};
pub use scanner::{MediaScannerClient, ScanKind, ScanOutcome};
pub use watch_folder::WatchFolderPolicy;
pub use worker::Worker;
pub use workflow::{
    WorkResult, WorkStep, WorkStepAction, WorkStepStatus, Workflow, WorkflowId, WorkflowSource,
    MIRROR_STEP_PRIORITY,
};
