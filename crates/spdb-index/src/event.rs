use std::sync::Arc;

/// A change to the membership of a [`ProgramManager`](crate::ProgramManager).
#[derive(Debug)]
pub enum ProgramEvent<D> {
    /// A document was indexed under a key that was previously free.
    Added { new: Arc<D> },
    /// A document replaced the one previously indexed under the same key.
    Replaced { old: Arc<D>, new: Arc<D> },
    /// A document left the index.
    Removed { old: Arc<D> },
}

impl<D> Clone for ProgramEvent<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Added { new } => Self::Added { new: Arc::clone(new) },
            Self::Replaced { old, new } => Self::Replaced {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Self::Removed { old } => Self::Removed { old: Arc::clone(old) },
        }
    }
}

impl<D> ProgramEvent<D> {
    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Replaced { .. } => "replaced",
            Self::Removed { .. } => "removed",
        }
    }
}

/// Receiver of index membership events.
pub trait ProgramEventListener<D>: Send + Sync {
    fn program_changed(&self, event: &ProgramEvent<D>);
}
