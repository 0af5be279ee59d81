//! # Device Configuration
//!
//! Settings model for the sync service plus the runtime wiring that binds
//! configured storages to their host-provided handlers.
//!
//! ## Overview
//!
//! Configuration splits into two layers:
//!
//! - [`DeviceSettings`] — plain serde data loaded by the host (scanner
//!   endpoint, storage declarations, worker count). Validated fail-fast with
//!   actionable messages.
//! - [`AvailableStorages`] — the validated id → [`StorageObject`] map, where
//!   each storage carries its `Arc<dyn StorageHandler>`. Generators and
//!   workers only ever see this layer.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{AvailableStorages, DeviceSettings};
//!
//! let settings: DeviceSettings = serde_json::from_str(&raw)?;
//! let storages = AvailableStorages::from_settings(&settings, handlers)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bridge_traits::StorageHandler;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_scanner_port() -> u16 {
    8000
}

fn default_worker_count() -> usize {
    3
}

/// Connection settings for the external media scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaScannerSettings {
    /// Scanner host. Unset (or empty) disables scanner operations: the
    /// worker reports those steps as skipped instead of failing.
    #[serde(default)]
    pub host: Option<String>,

    /// Scanner port.
    #[serde(default = "default_scanner_port")]
    pub port: u16,
}

impl MediaScannerSettings {
    /// Base URL for scanner requests, or `None` when the scanner is disabled.
    pub fn base_url(&self) -> Option<String> {
        self.host
            .as_deref()
            .filter(|host| !host.is_empty())
            .map(|host| format!("http://{}:{}", host, self.port))
    }
}

impl Default for MediaScannerSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_scanner_port(),
        }
    }
}

/// Declaration of one storage endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Stable storage id, referenced by tracked items and work-steps.
    pub id: String,

    /// Whether this storage is a watch folder mirrored into a target.
    #[serde(default)]
    pub watch_folder: bool,

    /// Target storage id; required when `watch_folder` is set.
    #[serde(default)]
    pub watch_folder_target_id: Option<String>,

    /// Prefix applied when addressing this storage's files on the scanner.
    #[serde(default)]
    pub media_path: Option<String>,
}

/// Top-level settings for one device running the sync service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub media_scanner: MediaScannerSettings,

    #[serde(default)]
    pub storages: Vec<StorageSettings>,

    /// Number of concurrent workers the dispatcher may warm up.
    #[serde(default = "default_worker_count")]
    pub workers: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            media_scanner: MediaScannerSettings::default(),
            storages: Vec::new(),
            workers: default_worker_count(),
        }
    }
}

impl DeviceSettings {
    /// Validate storage declarations.
    ///
    /// # Errors
    ///
    /// Rejects duplicate storage ids, watch folders without a target, watch
    /// folders targeting themselves and targets that resolve to no declared
    /// storage.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for storage in &self.storages {
            if !seen.insert(storage.id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate storage id '{}'",
                    storage.id
                )));
            }
        }

        for storage in &self.storages {
            if !storage.watch_folder {
                continue;
            }
            let Some(target_id) = storage.watch_folder_target_id.as_deref() else {
                return Err(Error::Config(format!(
                    "watch folder '{}' has no watch_folder_target_id",
                    storage.id
                )));
            };
            if target_id == storage.id {
                return Err(Error::Config(format!(
                    "watch folder '{}' targets itself",
                    storage.id
                )));
            }
            if !seen.contains(target_id) {
                return Err(Error::Config(format!(
                    "watch folder '{}' targets unknown storage '{}'",
                    storage.id, target_id
                )));
            }
        }

        Ok(())
    }
}

/// A configured storage bound to its handler.
#[derive(Clone)]
pub struct StorageObject {
    pub id: String,
    pub handler: Arc<dyn StorageHandler>,
    pub watch_folder: bool,
    pub watch_folder_target_id: Option<String>,
    pub media_path: Option<String>,
}

impl std::fmt::Debug for StorageObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageObject")
            .field("id", &self.id)
            .field("handler", &"StorageHandler { ... }")
            .field("watch_folder", &self.watch_folder)
            .field("watch_folder_target_id", &self.watch_folder_target_id)
            .field("media_path", &self.media_path)
            .finish()
    }
}

/// The validated set of storages available to generators and workers.
#[derive(Debug, Clone, Default)]
pub struct AvailableStorages {
    map: HashMap<String, Arc<StorageObject>>,
}

impl AvailableStorages {
    /// Bind settings to handlers.
    ///
    /// # Errors
    ///
    /// Fails when [`DeviceSettings::validate`] rejects the settings or when a
    /// declared storage has no handler in `handlers`.
    pub fn from_settings(
        settings: &DeviceSettings,
        mut handlers: HashMap<String, Arc<dyn StorageHandler>>,
    ) -> Result<Self> {
        settings.validate()?;

        let mut map = HashMap::new();
        for declared in &settings.storages {
            let handler = handlers.remove(&declared.id).ok_or_else(|| {
                Error::CapabilityMissing {
                    capability: format!("StorageHandler '{}'", declared.id),
                    message: "No handler implementation provided for this storage. \
                              Register one before building the storage set."
                        .to_string(),
                }
            })?;

            map.insert(
                declared.id.clone(),
                Arc::new(StorageObject {
                    id: declared.id.clone(),
                    handler,
                    watch_folder: declared.watch_folder,
                    watch_folder_target_id: declared.watch_folder_target_id.clone(),
                    media_path: declared.media_path.clone(),
                }),
            );
        }

        Ok(Self { map })
    }

    /// Build directly from storage objects (used by tests and embedded hosts).
    pub fn from_objects(objects: impl IntoIterator<Item = StorageObject>) -> Self {
        Self {
            map: objects
                .into_iter()
                .map(|object| (object.id.clone(), Arc::new(object)))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<StorageObject>> {
        self.map.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<StorageObject>> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
