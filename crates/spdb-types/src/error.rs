use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid node key: {0}")]
    InvalidNodeKey(String),

    #[error("invalid program id {id:?}: {reason}")]
    InvalidProgramId { id: String, reason: String },

    #[error("invalid observation id: {0}")]
    InvalidObservationId(String),
}
