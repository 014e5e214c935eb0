use std::path::PathBuf;

use spdb_types::CodecError;

/// Errors from durable storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the storage directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The storage path exists but is not a directory.
    #[error("storage path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Storage intervals must be positive.
    #[error("invalid storage interval: {0} ms (must be > 0)")]
    InvalidInterval(u64),

    /// The background flush thread could not be started.
    #[error("failed to start flush thread: {0}")]
    Spawn(String),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
