use std::fmt;

use serde::{Deserialize, Serialize};

/// Which part of a functor run failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Execute,
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Execute => "execute",
            Self::Finished => "finished",
        })
    }
}

/// Failure recorded on a functor by the executor.
///
/// Kept as text so that it can travel back to the functor's issuer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctorError {
    /// The functor returned an error.
    #[error("functor {stage} failed: {message}")]
    Failed { stage: Stage, message: String },

    /// The functor panicked.
    #[error("functor {stage} panicked: {message}")]
    Panicked { stage: Stage, message: String },
}

impl FunctorError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Failed { stage, .. } | Self::Panicked { stage, .. } => *stage,
        }
    }
}

/// Errors from setting up or dispatching functor runs.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// No functor is registered under the message tag.
    #[error("unknown functor: {0}")]
    UnknownFunctor(String),

    /// The message payload could not be turned into a functor.
    #[error("bad payload for {tag}: {message}")]
    BadPayload { tag: String, message: String },

    /// The timer runtime could not be started.
    #[error("failed to start timer runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result alias for execution setup.
pub type ExecResult<T> = Result<T, ExecError>;
