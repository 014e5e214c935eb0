use std::sync::Arc;

use spdb_types::{DocumentKind, NodeKey, RootDocument};

/// An observation inside a program.
#[derive(Debug)]
pub struct ObservationNode<D> {
    pub program: Arc<D>,
    pub key: NodeKey,
}

impl<D> Clone for ObservationNode<D> {
    fn clone(&self) -> Self {
        Self {
            program: Arc::clone(&self.program),
            key: self.key,
        }
    }
}

/// A node handed to a functor.
#[derive(Debug)]
pub enum Node<D> {
    Program(Arc<D>),
    NightlyRecord(Arc<D>),
    Observation(ObservationNode<D>),
}

impl<D> Clone for Node<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Program(d) => Self::Program(Arc::clone(d)),
            Self::NightlyRecord(d) => Self::NightlyRecord(Arc::clone(d)),
            Self::Observation(o) => Self::Observation(o.clone()),
        }
    }
}

impl<D: RootDocument> Node<D> {
    /// Wrap a root document according to its kind.
    pub fn root(doc: Arc<D>) -> Self {
        match doc.kind() {
            DocumentKind::Program => Self::Program(doc),
            DocumentKind::NightlyRecord => Self::NightlyRecord(doc),
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            Self::Program(d) | Self::NightlyRecord(d) => d.node_key(),
            Self::Observation(o) => o.key,
        }
    }

    /// The root document this node belongs to.
    pub fn root_document(&self) -> &Arc<D> {
        match self {
            Self::Program(d) | Self::NightlyRecord(d) => d,
            Self::Observation(o) => &o.program,
        }
    }
}
