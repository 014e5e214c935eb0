//! Error types for the index crate.

use spdb_types::{DocumentKind, NodeKey, ProgramId};

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IndexError {
    /// The program id is already bound to a different document.
    #[error("program id {id} is already used by {existing}; cannot index {incoming}")]
    IdClash {
        id: ProgramId,
        existing: NodeKey,
        incoming: NodeKey,
    },

    /// The document kind does not match the index.
    #[error("cannot put a {actual} into the {expected} index")]
    WrongKind {
        expected: DocumentKind,
        actual: DocumentKind,
    },
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
