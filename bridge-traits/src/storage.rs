//! Storage Handler Abstractions
//!
//! Platform-agnostic traits for addressing one storage endpoint: enumerating
//! files, fetching and writing them with progress reporting, and observing
//! change events.
//!
//! A *storage* here is anything the host can expose behind [`StorageHandler`]:
//! a local watch folder, an SMB share, an object store. The sync core never
//! touches file contents directly; it only moves [`StorageFile`] handles
//! between storages and reacts to the [`StorageEvent`] stream.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// Properties reported by a storage for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    /// File size in bytes.
    pub size: u64,
    /// Modification timestamp (Unix millis), when the storage reports one.
    pub modified_at: Option<i64>,
}

/// A file addressed by its storage-relative path.
///
/// `name` is the identity: unique within its storage and stable across
/// observations. A `StorageFile` is a snapshot; a later event for the same
/// path may carry different properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFile {
    /// Storage-relative path, e.g. `clips/interview.mov`.
    pub name: String,
    /// Size in bytes at observation time.
    pub size: u64,
    /// Modification timestamp (Unix millis), when known.
    pub modified_at: Option<i64>,
}

impl StorageFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            modified_at: None,
        }
    }

    /// Properties snapshot for this file.
    pub fn properties(&self) -> FileProperties {
        FileProperties {
            size: self.size,
            modified_at: self.modified_at,
        }
    }
}

/// Kind of change observed on a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEventKind {
    Add,
    Change,
    Delete,
}

impl StorageEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEventKind::Add => "add",
            StorageEventKind::Change => "change",
            StorageEventKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for StorageEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change event emitted by a storage handler.
///
/// `file` is present for add/change events and absent for delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub kind: StorageEventKind,
    /// Storage-relative path of the affected file.
    pub path: String,
    pub file: Option<StorageFile>,
}

impl StorageEvent {
    pub fn added(file: StorageFile) -> Self {
        Self {
            kind: StorageEventKind::Add,
            path: file.name.clone(),
            file: Some(file),
        }
    }

    pub fn changed(file: StorageFile) -> Self {
        Self {
            kind: StorageEventKind::Change,
            path: file.name.clone(),
            file: Some(file),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: StorageEventKind::Delete,
            path: path.into(),
            file: None,
        }
    }
}

/// Progress callback for uploads; values are fractions in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Handle to an in-flight upload started by [`StorageHandler::put_file`].
///
/// Couples the transfer's completion with a [`CancellationToken`] so a caller
/// can abort it from another task. Cancelling after the transfer settled is a
/// no-op.
pub struct UploadHandle {
    cancellation: CancellationToken,
    completion: oneshot::Receiver<Result<()>>,
}

impl UploadHandle {
    pub fn new(cancellation: CancellationToken, completion: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            cancellation,
            completion,
        }
    }

    /// Token that aborts the transfer when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Wait for the upload to settle.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Cancelled`] when the transfer was aborted, or
    /// whatever error the uploading side reported. A dropped uploader maps to
    /// `OperationFailed`.
    pub async fn finish(self) -> Result<()> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::OperationFailed(
                "upload task dropped before completion".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandle")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// One storage endpoint: a watch folder, a network share, an object store.
///
/// Mutating calls (`put_file`, `delete_file`) may be issued concurrently for
/// *different* files; implementations must be safe under concurrent
/// invocation.
#[async_trait]
pub trait StorageHandler: Send + Sync {
    /// Enumerate every file currently present on this storage.
    async fn get_all_files(&self) -> Result<Vec<StorageFile>>;

    /// Fetch a single file by its storage-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when no such file exists.
    async fn get_file(&self, name: &str) -> Result<StorageFile>;

    /// Start writing `file` into this storage.
    ///
    /// Returns once the transfer is underway; the transfer itself runs until
    /// the returned [`UploadHandle`] settles. `progress` receives fractions
    /// in `[0, 1]`.
    async fn put_file(
        &self,
        file: &StorageFile,
        progress: Option<ProgressFn>,
    ) -> Result<UploadHandle>;

    /// Remove a file from this storage.
    async fn delete_file(&self, file: &StorageFile) -> Result<()>;

    /// Subscribe to change events.
    ///
    /// Each call creates an independent receiver; past events are not
    /// replayed. Slow subscribers observe `RecvError::Lagged`.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}
