use std::sync::Arc;

use spdb_types::{DocumentKind, NodeKey, RootDocument};

use crate::error::StoreResult;
use crate::traits::Persister;

/// Persister that keeps nothing. Used for ephemeral databases and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransientPersister;

impl<D: RootDocument> Persister<D> for TransientPersister {
    fn reload_all(&self, _kind: DocumentKind) -> Vec<Arc<D>> {
        Vec::new()
    }

    fn store(&self, _doc: &D) -> StoreResult<()> {
        Ok(())
    }

    fn remove(&self, _key: &NodeKey) -> StoreResult<bool> {
        Ok(false)
    }

    fn size_of(&self, _key: &NodeKey) -> Option<u64> {
        None
    }

    fn total_storage_bytes(&self) -> u64 {
        0
    }

    fn is_durable(&self) -> bool {
        false
    }
}
