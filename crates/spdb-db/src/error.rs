use std::path::PathBuf;

use spdb_exec::ExecError;
use spdb_index::IndexError;
use spdb_store::StoreError;
use spdb_trigger::TriggerError;
use spdb_types::NodeKey;

/// Errors from database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Identity index rejection, including program id clashes.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Durable storage failure or invalid storage setting.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// A functor targeted a node this database does not hold.
    #[error("node not local: {0}")]
    NotLocal(NodeKey),

    /// The database uuid file exists but cannot be read.
    #[error("invalid uuid file {}: {reason}", .path.display())]
    UuidFile { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The database has been shut down.
    #[error("database is shut down")]
    ShutDown,
}

impl DbError {
    /// Whether this is a program id clash from `put`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Index(IndexError::IdClash { .. }))
    }
}

/// Result alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
