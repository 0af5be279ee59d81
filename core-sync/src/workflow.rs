//! # Work-flow Model
//!
//! Value types describing mirror work: a [`Workflow`] is an ordered sequence
//! of [`WorkStep`]s produced by a generator and executed, one step per
//! worker, by the dispatcher's pool.
//!
//! ## Status machine
//!
//! ```text
//! Idle → Working → { Done | Error | Skipped }
//! ```
//!
//! There is no transition back to `Idle`; a step that must run again is a new
//! step in a new work-flow.

use std::str::FromStr;

use bridge_traits::StorageFile;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Priority assigned to mirror work-steps (copy and delete).
pub const MIRROR_STEP_PRIORITY: u32 = 1;

// ============================================================================
// Ids
// ============================================================================

/// Work-flow identifier: `<file path>_<random>`.
///
/// The path prefix keeps dispatcher logs greppable by file; the random suffix
/// keeps re-emissions for the same path distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn for_path(path: &str) -> Self {
        Self(format!("{}_{}", path, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Steps
// ============================================================================

/// What a work-step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStepAction {
    /// Copy the file onto the target storage, then trigger a media scan.
    Copy,
    /// Remove the file from the target storage.
    Delete,
    /// Trigger a media-info scan on the scanner.
    Scan,
    /// Trigger advanced metadata generation on the scanner.
    GenerateMetadata,
    /// Trigger preview generation on the scanner.
    GeneratePreview,
    /// Trigger thumbnail generation on the scanner.
    GenerateThumbnail,
}

impl WorkStepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStepAction::Copy => "copy",
            WorkStepAction::Delete => "delete",
            WorkStepAction::Scan => "scan",
            WorkStepAction::GenerateMetadata => "generate_metadata",
            WorkStepAction::GeneratePreview => "generate_preview",
            WorkStepAction::GenerateThumbnail => "generate_thumbnail",
        }
    }
}

impl std::fmt::Display for WorkStepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The current status of a work-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStepStatus {
    /// Created but not yet assigned.
    Idle,
    /// A worker is executing the step.
    Working,
    /// Completed successfully.
    Done,
    /// Failed; `WorkResult::messages` carries the reasons.
    Error,
    /// Deliberately not performed (e.g. scanner not configured).
    Skipped,
}

impl WorkStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStepStatus::Idle => "idle",
            WorkStepStatus::Working => "working",
            WorkStepStatus::Done => "done",
            WorkStepStatus::Error => "error",
            WorkStepStatus::Skipped => "skipped",
        }
    }

    /// Check if this status represents a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkStepStatus::Done | WorkStepStatus::Error | WorkStepStatus::Skipped
        )
    }

    fn can_transition(&self, to: WorkStepStatus) -> bool {
        match (self, to) {
            (WorkStepStatus::Idle, WorkStepStatus::Working) => true,
            (WorkStepStatus::Working, to) => to.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for WorkStepStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(WorkStepStatus::Idle),
            "working" => Ok(WorkStepStatus::Working),
            "done" => Ok(WorkStepStatus::Done),
            "error" => Ok(WorkStepStatus::Error),
            "skipped" => Ok(WorkStepStatus::Skipped),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for WorkStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work assigned to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStep {
    pub action: WorkStepAction,
    /// The file the step operates on (snapshot at emission time).
    pub file: StorageFile,
    /// Storage the step writes to or deletes from; resolved against the
    /// available-storage set at execution time.
    pub target_storage_id: String,
    pub priority: u32,
    pub status: WorkStepStatus,
    /// Fraction in `[0, 1]`; monotone while the step is working.
    pub progress: f32,
}

impl WorkStep {
    pub fn new(
        action: WorkStepAction,
        file: StorageFile,
        target_storage_id: impl Into<String>,
        priority: u32,
    ) -> Self {
        Self {
            action,
            file,
            target_storage_id: target_storage_id.into(),
            priority,
            status: WorkStepStatus::Idle,
            progress: 0.0,
        }
    }

    /// Transition `Idle → Working`.
    pub fn begin(&mut self) -> Result<()> {
        self.transition(WorkStepStatus::Working)
    }

    /// Transition into a terminal status.
    pub fn finish(&mut self, status: WorkStepStatus) -> Result<()> {
        self.transition(status)
    }

    fn transition(&mut self, to: WorkStepStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(SyncError::InvalidStepTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

// ============================================================================
// Flows and results
// ============================================================================

/// Where a work-flow originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowSource {
    /// Generated from a local media item observed on a watched storage.
    LocalMediaItem,
}

/// An ordered sequence of work-steps produced by a generator.
///
/// `finished` and `success` belong to the dispatcher: it sets them once every
/// step has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub source: WorkflowSource,
    pub steps: Vec<WorkStep>,
    pub priority: u32,
    /// Creation timestamp (Unix millis).
    pub created_at: i64,
    pub finished: bool,
    pub success: bool,
}

impl Workflow {
    /// New flow for the file at `path`, inheriting the highest step priority.
    pub fn new(path: &str, source: WorkflowSource, steps: Vec<WorkStep>) -> Self {
        let priority = steps.iter().map(|step| step.priority).max().unwrap_or(0);
        Self {
            id: WorkflowId::for_path(path),
            source,
            steps,
            priority,
            created_at: Utc::now().timestamp_millis(),
            finished: false,
            success: false,
        }
    }
}

/// What a worker reports back for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub status: WorkStepStatus,
    pub messages: Vec<String>,
}

impl WorkResult {
    pub fn done() -> Self {
        Self {
            status: WorkStepStatus::Done,
            messages: Vec::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: WorkStepStatus::Skipped,
            messages: vec![reason.into()],
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: WorkStepStatus::Error,
            messages: vec![reason.into()],
        }
    }
}
