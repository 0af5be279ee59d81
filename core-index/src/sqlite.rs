//! SQLite-backed tracked-media store.

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::model::TrackedMediaItem;
use crate::store::{KeyLocks, TrackedMediaStore, UpsertFn};

/// SQLite implementation of [`TrackedMediaStore`].
///
/// `target_storage_ids` is stored as a JSON text column; the per-key upsert
/// discipline is enforced with a [`KeyLocks`] map in front of the pool.
pub struct SqliteTrackedMediaStore {
    pool: SqlitePool,
    locks: KeyLocks,
}

/// Database row representation of a tracked item
#[derive(Debug, FromRow)]
struct TrackedMediaRow {
    name: String,
    source_storage_id: String,
    target_storage_ids: String,
    last_seen: i64,
}

impl TryFrom<TrackedMediaRow> for TrackedMediaItem {
    type Error = IndexError;

    fn try_from(row: TrackedMediaRow) -> Result<Self> {
        let target_storage_ids: Vec<String> = serde_json::from_str(&row.target_storage_ids)
            .map_err(|e| {
                IndexError::Database(format!(
                    "corrupt target_storage_ids for '{}': {}",
                    row.name, e
                ))
            })?;

        Ok(TrackedMediaItem {
            name: row.name,
            source_storage_id: row.source_storage_id,
            target_storage_ids,
            last_seen: row.last_seen,
        })
    }
}

impl SqliteTrackedMediaStore {
    /// Create a store over an existing pool. Call [`initialize`] before use.
    ///
    /// [`initialize`]: SqliteTrackedMediaStore::initialize
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: KeyLocks::new(),
        }
    }

    /// Create the backing table and indexes if they don't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_media (
                name TEXT PRIMARY KEY,
                source_storage_id TEXT NOT NULL,
                target_storage_ids TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tracked_media_source_seen
            ON tracked_media(source_storage_id, last_seen)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn write(&self, item: &TrackedMediaItem) -> Result<()> {
        item.validate().map_err(|message| IndexError::InvalidItem {
            field: "tracked_media_item".to_string(),
            message,
        })?;

        let targets = serde_json::to_string(&item.target_storage_ids)
            .map_err(|e| IndexError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO tracked_media (name, source_storage_id, target_storage_ids, last_seen)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                source_storage_id = excluded.source_storage_id,
                target_storage_ids = excluded.target_storage_ids,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(&item.name)
        .bind(&item.source_storage_id)
        .bind(&targets)
        .bind(item.last_seen)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<TrackedMediaItem>> {
        let row: Option<TrackedMediaRow> = sqlx::query_as(
            r#"
            SELECT name, source_storage_id, target_storage_ids, last_seen
            FROM tracked_media
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TrackedMediaItem::try_from).transpose()
    }
}

#[async_trait]
impl TrackedMediaStore for SqliteTrackedMediaStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<TrackedMediaItem>> {
        self.fetch(name).await
    }

    async fn put(&self, item: &TrackedMediaItem) -> Result<()> {
        self.write(item).await
    }

    async fn upsert(&self, name: &str, apply: UpsertFn) -> Result<Option<TrackedMediaItem>> {
        let lock = self.locks.for_key(name).await;
        let _guard = lock.lock().await;

        let current = self.fetch(name).await?;
        match apply(current) {
            Some(next) => {
                self.write(&next).await?;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracked_media WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        debug!(name, removed, "Removed tracked item");
        Ok(removed)
    }

    async fn stale_in_storage(
        &self,
        storage_id: &str,
        seen_before: i64,
    ) -> Result<Vec<TrackedMediaItem>> {
        let rows: Vec<TrackedMediaRow> = sqlx::query_as(
            r#"
            SELECT name, source_storage_id, target_storage_ids, last_seen
            FROM tracked_media
            WHERE source_storage_id = ? AND last_seen < ?
            "#,
        )
        .bind(storage_id)
        .bind(seen_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrackedMediaItem::try_from).collect()
    }
}
