//! # Core Runtime
//!
//! Runtime plumbing shared by the sync core:
//!
//! - **Events** (`events`): broadcast [`EventBus`](events::EventBus) carrying
//!   typed, serialisable summaries of generator and worker activity
//! - **Configuration** (`config`): [`DeviceSettings`](config::DeviceSettings)
//!   with fail-fast validation, and the
//!   [`AvailableStorages`](config::AvailableStorages) wiring that binds
//!   declared storages to their host handlers
//! - **Logging** (`logging`): `tracing-subscriber` bootstrap with
//!   pretty/JSON/compact formats

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{
    AvailableStorages, DeviceSettings, MediaScannerSettings, StorageObject, StorageSettings,
};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream, SyncEvent, WorkerEvent};
pub use logging::{init_logging, LogFormat, LoggingConfig};
