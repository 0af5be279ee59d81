//! # Tracked Media Index
//!
//! Persistent map of file → replication state: which source storage a file
//! came from, which targets it has been successfully mirrored to, and when an
//! initial scan last saw it.
//!
//! ## Components
//!
//! - **Model** (`model`): [`TrackedMediaItem`] and its invariants
//! - **Store contract** (`store`): [`TrackedMediaStore`] with per-key
//!   serialised `upsert`, plus the [`KeyLocks`] primitive implementations use
//!   to enforce it
//! - **SQLite backend** (`sqlite`): [`SqliteTrackedMediaStore`] on `sqlx`
//! - **Pooling** (`db`): WAL-mode pool construction and in-memory test pools

pub mod db;
pub mod error;
pub mod model;
pub mod sqlite;
pub mod store;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{IndexError, Result};
pub use model::TrackedMediaItem;
pub use sqlite::SqliteTrackedMediaStore;
pub use store::{KeyLocks, TrackedMediaStore, UpsertFn};
