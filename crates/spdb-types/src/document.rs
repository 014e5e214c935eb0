use std::sync::Arc;

use crate::change::{ChangeListener, ListenerId};
use crate::key::{NodeKey, ProgramId};
use crate::kind::DocumentKind;

/// A mutable root document as seen by the store.
///
/// The store only indexes, persists, and listens to documents; it never
/// edits them. Implementations must be safe to share across threads, but the
/// store does not make document-internal mutation thread safe. Callers must
/// not edit one document from two threads at once.
pub trait RootDocument: Send + Sync + 'static {
    /// Immutable identity, assigned at creation.
    fn node_key(&self) -> NodeKey;

    /// Current human-readable id, if any. May change over the document's life.
    fn program_id(&self) -> Option<ProgramId>;

    fn kind(&self) -> DocumentKind;

    /// Keys of the observations contained in this document, in document order.
    fn observation_keys(&self) -> Vec<NodeKey> {
        Vec::new()
    }

    /// Key of the observation with the given 1-based number.
    fn find_observation(&self, _number: u32) -> Option<NodeKey> {
        None
    }

    fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId;

    /// Returns `true` if the listener was registered.
    fn remove_change_listener(&self, id: ListenerId) -> bool;
}

/// Errors from encoding or decoding a persisted document.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Byte encoding of root documents, used by durable persisters.
pub trait DocumentCodec<D>: Send + Sync {
    fn encode(&self, doc: &D) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<D, CodecError>;
}
