//! # Tracked Media Store
//!
//! Persistence contract for [`TrackedMediaItem`] records.
//!
//! ## Upsert discipline
//!
//! `upsert` is the only read-modify-write primitive and it must be
//! serialisable *per key*: two workers finishing copies of the same file to
//! different targets must both observe and produce a consistent
//! `target_storage_ids` set — no lost append. Implementations serialise on
//! the item name (see [`KeyLocks`]), not on the whole store; unrelated files
//! proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::TrackedMediaItem;

/// Read-modify-write closure applied under the per-key lock.
///
/// Receives the current record (or `None`) and returns the record to write.
/// Returning `None` writes nothing.
pub type UpsertFn = Box<dyn FnOnce(Option<TrackedMediaItem>) -> Option<TrackedMediaItem> + Send>;

/// Persistence contract consumed by generators and workers.
#[async_trait]
pub trait TrackedMediaStore: Send + Sync {
    /// Fetch a record by file name.
    async fn get_by_name(&self, name: &str) -> Result<Option<TrackedMediaItem>>;

    /// Unconditional write (insert or replace).
    async fn put(&self, item: &TrackedMediaItem) -> Result<()>;

    /// Atomic per-key read-modify-write.
    ///
    /// Returns the written record, or `None` when `apply` declined to write.
    async fn upsert(&self, name: &str, apply: UpsertFn) -> Result<Option<TrackedMediaItem>>;

    /// Remove a record. Returns whether a record existed.
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Records from `storage_id` whose `last_seen` is strictly before
    /// `seen_before` — the stale set after an initial scan.
    async fn stale_in_storage(
        &self,
        storage_id: &str,
        seen_before: i64,
    ) -> Result<Vec<TrackedMediaItem>>;
}

/// Per-key async lock map serialising upserts on one item name.
///
/// Lock entries are created on first use and kept for the store's lifetime;
/// the set of keys is bounded by the set of tracked files.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `key`.
    pub async fn for_key(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl std::fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLocks").finish()
    }
}
