//! Error types for the archive.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for archive operations.
///
/// Every filesystem failure on a mutating path names the path it failed on
/// and keeps the underlying `io::Error` as its source.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No current value for key: {key}")]
    NotFound { key: String },

    #[error("Slot file not found: {}", path.display())]
    SlotMissing { path: PathBuf },

    #[error("Could not decode {} with codec {codec}", path.display())]
    DecodeFailed { path: PathBuf, codec: &'static str },

    #[error("Could not move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not delete {}: {source}", path.display())]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not delete key directory {}: {source}", path.display())]
    DeleteKeyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Retention limit must be positive, got {0}")]
    InvalidLimit(usize),

    #[error("Session was already finished")]
    SessionAlreadyFinished,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Archive root is locked by another instance")]
    Locked,

    #[error("Key worker is no longer running")]
    WorkerGone,
}

impl From<serde_json::Error> for ArchiveError {
    fn from(e: serde_json::Error) -> Self {
        ArchiveError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ArchiveError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ArchiveError::Serialization(e.to_string())
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
