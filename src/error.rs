//! Error types for kvfile
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using KvFileError
pub type Result<T> = std::result::Result<T, KvFileError>;

/// Boxed error returned by codec implementations
pub type CodecError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for kvfile operations
#[derive(Debug, Error)]
pub enum KvFileError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("Store file corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Engine is closed")]
    EngineClosed,

    #[error("Collection '{0}' has been removed")]
    CollectionRemoved(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(#[source] CodecError),

    // -------------------------------------------------------------------------
    // Store / Registry Errors
    // -------------------------------------------------------------------------
    #[error("No default store has been opened")]
    NoDefaultStore,

    #[error("Store {} is closed", .0.display())]
    StoreClosed(PathBuf),

    #[error("Background flush failed: {0}")]
    BackgroundFlush(#[source] Box<KvFileError>),

    // -------------------------------------------------------------------------
    // Compaction Errors
    // -------------------------------------------------------------------------
    /// The compacted file could not be installed and the backup could not be
    /// restored either. The on-disk state of `path` is indeterminate.
    #[error(
        "Unrecoverable compaction swap for {}: install failed ({install}), restore from {} failed ({restore})",
        .path.display(),
        .backup.display()
    )]
    UnrecoverableSwap {
        path: PathBuf,
        backup: PathBuf,
        install: std::io::Error,
        restore: std::io::Error,
    },
}

impl KvFileError {
    /// Whether the error leaves a store file in an indeterminate state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KvFileError::UnrecoverableSwap { .. })
    }
}

impl From<bincode::Error> for KvFileError {
    fn from(err: bincode::Error) -> Self {
        KvFileError::Serialization(err.to_string())
    }
}
