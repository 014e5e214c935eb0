use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use spdb_types::{ChangeListener, NodeKey, RootDocument, StructuralChange};

/// Documents changed since they were last stored, keyed by node key.
///
/// Draining is a single get-and-clear under the set's lock, so a document
/// marked after a drain is picked up by the next one.
#[derive(Debug)]
pub struct DirtySet<D> {
    docs: Mutex<BTreeMap<NodeKey, Arc<D>>>,
}

impl<D> Default for DirtySet<D> {
    fn default() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<D: RootDocument> DirtySet<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a document dirty. Returns `true` if it was clean.
    pub fn mark(&self, doc: Arc<D>) -> bool {
        self.docs
            .lock()
            .expect("dirty set lock poisoned")
            .insert(doc.node_key(), doc)
            .is_none()
    }

    /// Take every dirty document, leaving the set empty.
    pub fn drain(&self) -> Vec<Arc<D>> {
        let docs = std::mem::take(&mut *self.docs.lock().expect("dirty set lock poisoned"));
        docs.into_values().collect()
    }

    /// Clear one document's dirty flag, returning it if it was dirty.
    pub fn take(&self, key: &NodeKey) -> Option<Arc<D>> {
        self.docs.lock().expect("dirty set lock poisoned").remove(key)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.docs
            .lock()
            .expect("dirty set lock poisoned")
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.docs.lock().expect("dirty set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Change listener that marks one document dirty on every persistent change.
pub struct DirtyMarker<D> {
    doc: Weak<D>,
    set: Arc<DirtySet<D>>,
}

impl<D: RootDocument> DirtyMarker<D> {
    pub fn new(doc: &Arc<D>, set: Arc<DirtySet<D>>) -> Self {
        Self {
            doc: Arc::downgrade(doc),
            set,
        }
    }
}

impl<D: RootDocument> ChangeListener for DirtyMarker<D> {
    fn structure_changed(&self, change: &StructuralChange) {
        if change.transient {
            return;
        }
        if let Some(doc) = self.doc.upgrade() {
            self.set.mark(doc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use spdb_model::MemDocument;

    #[test]
    fn mark_then_drain_yields_document_once() {
        let set = DirtySet::new();
        let doc = MemDocument::program(None);

        assert!(set.mark(doc.clone()));
        assert!(!set.mark(doc.clone()));

        let drained = set.drain();
        assert_eq!(drained.len(), 1);
        assert!(Arc::ptr_eq(&drained[0], &doc));
        assert!(set.is_empty());
    }

    #[test]
    fn draining_empty_set_is_empty() {
        let set: DirtySet<MemDocument> = DirtySet::new();
        assert!(set.drain().is_empty());
    }

    #[test]
    fn take_clears_single_flag() {
        let set = DirtySet::new();
        let a = MemDocument::program(None);
        let b = MemDocument::program(None);
        set.mark(a.clone());
        set.mark(b.clone());

        assert!(set.take(&a.node_key()).is_some());
        assert!(set.take(&a.node_key()).is_none());
        assert!(!set.contains(&a.node_key()));
        assert!(set.contains(&b.node_key()));
    }

    #[test]
    fn marker_ignores_client_only_changes() {
        let set = Arc::new(DirtySet::new());
        let doc = MemDocument::program(None);
        doc.add_change_listener(Arc::new(DirtyMarker::new(&doc, set.clone())));

        doc.set_client_field("selected", Value::Bool(true));
        assert!(set.is_empty());

        doc.set_field("comment", Value::from("needs seeing"));
        assert!(set.contains(&doc.node_key()));
    }

    #[test]
    fn marker_does_not_keep_document_alive() {
        let set = Arc::new(DirtySet::<MemDocument>::new());
        let doc = MemDocument::program(None);
        let marker = DirtyMarker::new(&doc, set.clone());
        let key = doc.node_key();
        drop(doc);

        marker.structure_changed(&StructuralChange::new(key, key, "title", None, None));
        assert!(set.is_empty());
    }
}
