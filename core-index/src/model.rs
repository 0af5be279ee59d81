//! # Tracked Media Item
//!
//! The index record for one file across its source and target storages.
//!
//! A [`TrackedMediaItem`] exists exactly when a file has been accepted for
//! replication from a source storage. `target_storage_ids` holds the storages
//! where replication has *succeeded*: a worker appends a target on copy
//! success and removes it on delete success. `last_seen` is refreshed on each
//! initial scan and is monotonically non-decreasing across scans.

use serde::{Deserialize, Serialize};

/// Index record for one file.
///
/// The file name (its storage-relative path) is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMediaItem {
    /// Storage-relative path; unique per source storage.
    pub name: String,

    /// The storage the file is replicated *from*.
    pub source_storage_id: String,

    /// Storages where replication has succeeded. Unordered set; never
    /// contains `source_storage_id`.
    pub target_storage_ids: Vec<String>,

    /// When an initial scan last saw this file on its source (Unix millis).
    pub last_seen: i64,
}

impl TrackedMediaItem {
    /// New record for a file first sighted on `source_storage_id`.
    pub fn new(
        name: impl Into<String>,
        source_storage_id: impl Into<String>,
        last_seen: i64,
    ) -> Self {
        Self {
            name: name.into(),
            source_storage_id: source_storage_id.into(),
            target_storage_ids: Vec::new(),
            last_seen,
        }
    }

    /// Record a successful replication to `target_id`.
    ///
    /// Returns `false` when the target was already recorded (no change).
    pub fn add_target(&mut self, target_id: &str) -> bool {
        if self.has_target(target_id) {
            return false;
        }
        self.target_storage_ids.push(target_id.to_string());
        true
    }

    /// Record a successful removal from `target_id`.
    ///
    /// Returns `false` when the target was not recorded (no change).
    pub fn remove_target(&mut self, target_id: &str) -> bool {
        let before = self.target_storage_ids.len();
        self.target_storage_ids.retain(|id| id != target_id);
        self.target_storage_ids.len() != before
    }

    pub fn has_target(&self, target_id: &str) -> bool {
        self.target_storage_ids.iter().any(|id| id == target_id)
    }

    /// Validate the record's invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.source_storage_id.is_empty() {
            return Err("source_storage_id must not be empty".to_string());
        }
        if self.has_target(&self.source_storage_id) {
            return Err(format!(
                "source storage '{}' must not appear in target_storage_ids",
                self.source_storage_id
            ));
        }
        Ok(())
    }
}
