//! The identity index: live root documents of one kind.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, error, warn};

use spdb_types::{
    ChangeListener, DocumentKind, ListenerId, NodeKey, ProgramId, RootDocument, StructuralChange,
};

use crate::error::{IndexError, IndexResult};
use crate::event::{ProgramEvent, ProgramEventListener};

/// An indexed document together with the id it is bound under and the
/// handle of the id watcher registered on it.
struct Entry<D> {
    doc: Arc<D>,
    id: Option<ProgramId>,
    watcher: ListenerId,
}

struct Maps<D> {
    by_key: BTreeMap<NodeKey, Entry<D>>,
    by_id: HashMap<ProgramId, NodeKey>,
}

/// In-memory index of the live root documents of one [`DocumentKind`].
///
/// The index lock is held only while the maps are updated. Events are
/// delivered afterwards, so listeners may call back into the index.
pub struct ProgramManager<D: RootDocument> {
    kind: DocumentKind,
    maps: RwLock<Maps<D>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ProgramEventListener<D>>)>>,
    next_listener: AtomicU64,
    this: Weak<Self>,
}

impl<D: RootDocument> ProgramManager<D> {
    /// Create an empty index for documents of the given kind.
    pub fn new(kind: DocumentKind) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            kind,
            maps: RwLock::new(Maps {
                by_key: BTreeMap::new(),
                by_id: HashMap::new(),
            }),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    // ---------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------

    /// Index a document, replacing any document with the same key.
    ///
    /// Returns the replaced document, if any. Fails without touching the
    /// index if the document's program id is bound to a different key.
    pub fn put(&self, doc: Arc<D>) -> IndexResult<Option<Arc<D>>> {
        if doc.kind() != self.kind {
            return Err(IndexError::WrongKind {
                expected: self.kind,
                actual: doc.kind(),
            });
        }

        let key = doc.node_key();
        let id = doc.program_id();

        let old = {
            let mut guard = self.maps.write().expect("index lock poisoned");
            let maps = &mut *guard;

            if let Some(id) = &id {
                if let Some(existing) = maps.by_id.get(id) {
                    if *existing != key {
                        return Err(IndexError::IdClash {
                            id: id.clone(),
                            existing: *existing,
                            incoming: key,
                        });
                    }
                }
            }

            let watcher = doc.add_change_listener(Arc::new(IdWatcher {
                manager: self.this.clone(),
                key,
            }));
            let old = maps.by_key.insert(
                key,
                Entry {
                    doc: Arc::clone(&doc),
                    id: id.clone(),
                    watcher,
                },
            );

            if let Some(old) = &old {
                if let Some(old_id) = &old.id {
                    if maps.by_id.get(old_id) == Some(&key) {
                        maps.by_id.remove(old_id);
                    }
                }
                old.doc.remove_change_listener(old.watcher);
            }
            if let Some(id) = id {
                maps.by_id.insert(id, key);
            }

            old.map(|e| e.doc)
        };

        let event = match &old {
            None => ProgramEvent::Added { new: doc },
            Some(old) => ProgramEvent::Replaced {
                old: Arc::clone(old),
                new: doc,
            },
        };
        debug!(kind = %self.kind, key = %key, event = event.name(), "index put");
        self.fire(&event);

        Ok(old)
    }

    /// Remove the document with the given key. Removing an absent key is a
    /// no-op that returns `false`.
    pub fn remove(&self, key: &NodeKey) -> bool {
        self.take(key).is_some()
    }

    /// Remove and return the document with the given key.
    pub fn take(&self, key: &NodeKey) -> Option<Arc<D>> {
        let removed = {
            let mut guard = self.maps.write().expect("index lock poisoned");
            let maps = &mut *guard;
            let entry = maps.by_key.remove(key)?;
            if let Some(id) = &entry.id {
                if maps.by_id.get(id) == Some(key) {
                    maps.by_id.remove(id);
                }
            }
            entry.doc.remove_change_listener(entry.watcher);
            entry.doc
        };

        debug!(kind = %self.kind, key = %key, "index remove");
        self.fire(&ProgramEvent::Removed {
            old: Arc::clone(&removed),
        });
        Some(removed)
    }

    /// Remove every document, reporting each as removed. Returns the
    /// documents in key order.
    pub fn clear(&self) -> Vec<Arc<D>> {
        let entries = {
            let mut maps = self.maps.write().expect("index lock poisoned");
            maps.by_id.clear();
            std::mem::take(&mut maps.by_key)
        };

        let mut removed = Vec::with_capacity(entries.len());
        for entry in entries.into_values() {
            entry.doc.remove_change_listener(entry.watcher);
            removed.push(entry.doc);
        }
        for doc in &removed {
            self.fire(&ProgramEvent::Removed {
                old: Arc::clone(doc),
            });
        }
        removed
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    pub fn lookup(&self, key: &NodeKey) -> Option<Arc<D>> {
        self.maps
            .read()
            .expect("index lock poisoned")
            .by_key
            .get(key)
            .map(|e| Arc::clone(&e.doc))
    }

    pub fn lookup_by_id(&self, id: &ProgramId) -> Option<Arc<D>> {
        let maps = self.maps.read().expect("index lock poisoned");
        maps.by_id
            .get(id)
            .and_then(|key| maps.by_key.get(key))
            .map(|e| Arc::clone(&e.doc))
    }

    pub fn lookup_key_by_id(&self, id: &ProgramId) -> Option<NodeKey> {
        self.maps
            .read()
            .expect("index lock poisoned")
            .by_id
            .get(id)
            .copied()
    }

    /// Snapshot of all documents in key order.
    pub fn list_all(&self) -> Vec<Arc<D>> {
        self.maps
            .read()
            .expect("index lock poisoned")
            .by_key
            .values()
            .map(|e| Arc::clone(&e.doc))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.maps.read().expect("index lock poisoned").by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn ProgramEventListener<D>>) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn fire(&self, event: &ProgramEvent<D>) {
        let snapshot: Vec<Arc<dyn ProgramEventListener<D>>> = self
            .listeners
            .read()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.program_changed(event)));
            if result.is_err() {
                error!(kind = %self.kind, event = event.name(), "program event listener panicked");
            }
        }
    }

    /// Rebind the id of an indexed document after it renamed itself. The
    /// rename is reported as a removal followed by an addition.
    fn program_id_changed(&self, key: NodeKey) {
        let doc = {
            let mut guard = self.maps.write().expect("index lock poisoned");
            let maps = &mut *guard;
            let Some(entry) = maps.by_key.get_mut(&key) else {
                return;
            };
            let new_id = entry.doc.program_id();
            if entry.id == new_id {
                return;
            }

            if let Some(old_id) = &entry.id {
                if maps.by_id.get(old_id) == Some(&key) {
                    maps.by_id.remove(old_id);
                }
            }

            entry.id = match new_id {
                Some(id) => match maps.by_id.get(&id) {
                    Some(other) if *other != key => {
                        warn!(
                            kind = %self.kind,
                            key = %key,
                            id = %id,
                            existing = %other,
                            "program id already in use; document stays indexed by key only"
                        );
                        None
                    }
                    _ => {
                        maps.by_id.insert(id.clone(), key);
                        Some(id)
                    }
                },
                None => None,
            };

            Arc::clone(&entry.doc)
        };

        debug!(kind = %self.kind, key = %key, "program id changed");
        self.fire(&ProgramEvent::Removed {
            old: Arc::clone(&doc),
        });
        self.fire(&ProgramEvent::Added { new: doc });
    }
}

impl<D: RootDocument> std::fmt::Debug for ProgramManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramManager")
            .field("kind", &self.kind)
            .field("documents", &self.len())
            .finish()
    }
}

/// Watches one indexed document for program id changes.
struct IdWatcher<D: RootDocument> {
    manager: Weak<ProgramManager<D>>,
    key: NodeKey,
}

impl<D: RootDocument> ChangeListener for IdWatcher<D> {
    fn structure_changed(&self, change: &StructuralChange) {
        if !change.is_program_id_change() || change.root != self.key {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.program_id_changed(self.key);
        }
    }
}
