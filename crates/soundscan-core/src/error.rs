use soundscan_link::LinkError;
use thiserror::Error;

use crate::capture::CaptureError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not initialized: run 'soundscan init'")]
    NotInitialized,

    #[error("disk type not found: {0}")]
    DiskTypeNotFound(u64),

    #[error("scan not found: {0}")]
    ScanNotFound(u64),

    #[error("blade record not found: {0}")]
    BladeNotFound(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device is not connected")]
    NotConnected,

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Errors that end a scan session rather than a single frame.
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::Link(e) => e.is_fatal(),
            CoreError::NotConnected => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
