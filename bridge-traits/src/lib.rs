//! # Host Bridge Traits
//!
//! The contract between the sync core and host-provided backends.
//!
//! ## Overview
//!
//! This crate defines the capabilities the core requires but that each host
//! wires up differently:
//!
//! - [`StorageHandler`](storage::StorageHandler) — one storage endpoint:
//!   enumerate, fetch, put with progress, delete, emit change events
//! - [`HttpClient`](http::HttpClient) — async HTTP for sidecar services such
//!   as the media scanner
//!
//! Concrete storage backends (local watch folders, SMB shares, object
//! stores) are host concerns and never appear here; the core holds
//! `Arc<dyn StorageHandler>` and nothing more specific.
//!
//! ## Error Handling
//!
//! All traits use [`BridgeError`](error::BridgeError). Implementations
//! convert backend-specific errors and keep messages actionable; `NotFound`
//! is semantically meaningful to the reconciler (a missing mirror file
//! triggers a copy), so it must not be collapsed into a generic failure.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; handlers are shared across generator
//! and worker tasks via `Arc`.

pub mod error;
pub mod http;
pub mod storage;

pub use error::BridgeError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{
    FileProperties, ProgressFn, StorageEvent, StorageEventKind, StorageFile, StorageHandler,
    UploadHandle,
};
