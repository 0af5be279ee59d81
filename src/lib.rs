//! Workspace facade crate.
//!
//! This crate exists to expose feature flags that map to the individual
//! workspace crates (e.g., `core-sync`, `core-index`, `bridge-native`).
//! Host applications can depend on `mediasync` and enable the documented
//! features without needing to wire each crate individually.

pub use bridge_traits;

#[cfg(feature = "native-bridges")]
pub use bridge_native;

#[cfg(feature = "runtime")]
pub use core_runtime;

#[cfg(feature = "index")]
pub use core_index;

#[cfg(feature = "sync")]
pub use core_sync;
