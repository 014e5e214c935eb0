use std::sync::Arc;

use spdb_types::{DocumentKind, NodeKey, RootDocument};

use crate::error::StoreResult;

/// Durable home of root documents.
///
/// One persister may serve several document kinds; each kind is told apart
/// by its file suffix.
pub trait Persister<D: RootDocument>: Send + Sync {
    /// Load every stored document of the given kind.
    ///
    /// Never fails: unreadable records are logged and skipped, and when two
    /// records carry the same node key only the first is kept.
    fn reload_all(&self, kind: DocumentKind) -> Vec<Arc<D>>;

    /// Write the document's current state, replacing any earlier record.
    fn store(&self, doc: &D) -> StoreResult<()>;

    /// Delete the record for a key. Returns `true` if a record was tracked.
    ///
    /// A store already running for the key finishes first and its record is
    /// deleted. Stores that start later are skipped until [`restore`] is
    /// called for the key.
    ///
    /// [`restore`]: Persister::restore
    fn remove(&self, key: &NodeKey) -> StoreResult<bool>;

    /// Allow a removed key to be stored again.
    fn restore(&self, _key: &NodeKey) {}

    /// Size in bytes of the record for a key, if known.
    fn size_of(&self, key: &NodeKey) -> Option<u64>;

    /// Total bytes used by all tracked records.
    fn total_storage_bytes(&self) -> u64;

    /// Whether stored documents survive a restart.
    fn is_durable(&self) -> bool {
        true
    }
}
