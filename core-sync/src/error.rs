use bridge_traits::BridgeError;
use core_index::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage {0} is not available")]
    UnknownStorage(String),

    #[error("Watch folder {0} has no target storage configured")]
    MissingWatchTarget(String),

    #[error("Invalid work-step status: {0}")]
    InvalidStatus(String),

    #[error("Invalid work-step transition from {from} to {to}")]
    InvalidStepTransition { from: String, to: String },

    #[error("Invalid worker transition from {from} to {to}: {reason}")]
    InvalidWorkerTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
