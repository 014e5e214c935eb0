use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::key::NodeKey;

/// Property name raised when a root document's program id changes.
pub const PROGRAM_ID_PROPERTY: &str = "programId";

/// A structural change raised by a root document (or one of its nodes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuralChange {
    /// Key of the root document the change belongs to.
    pub root: NodeKey,
    /// Key of the node that was modified (the root itself or a descendant).
    pub modified_node: NodeKey,
    /// Name of the changed property.
    pub property: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Client-only property: never marks the document dirty.
    pub transient: bool,
}

impl StructuralChange {
    /// A change to a persistent property.
    pub fn new(
        root: NodeKey,
        modified_node: NodeKey,
        property: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            root,
            modified_node,
            property: property.into(),
            old_value,
            new_value,
            transient: false,
        }
    }

    /// Mark the change as client-only.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Returns `true` if this change renamed the root document.
    pub fn is_program_id_change(&self) -> bool {
        self.root == self.modified_node && self.property == PROGRAM_ID_PROPERTY
    }
}

/// Receiver of structural-change notifications.
pub trait ChangeListener: Send + Sync {
    fn structure_changed(&self, change: &StructuralChange);
}

/// Handle returned when registering a listener, used to deregister it.
pub type ListenerId = u64;

/// Listener registry shared by document implementations.
///
/// Dispatch happens on a snapshot of the registered listeners, outside the
/// registry lock, so a listener may register or deregister listeners while
/// it runs. A panicking listener is logged and does not stop delivery to the
/// others.
#[derive(Default)]
pub struct ChangeListeners {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
}

impl ChangeListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    /// Deregister a listener. Returns `true` if it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().expect("listener lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a change to every registered listener.
    pub fn fire(&self, change: &StructuralChange) {
        let snapshot: Vec<Arc<dyn ChangeListener>> = self
            .listeners
            .read()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.structure_changed(change)));
            if result.is_err() {
                error!(
                    root = %change.root,
                    property = %change.property,
                    "change listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for ChangeListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeListeners")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl ChangeListener for Recorder {
        fn structure_changed(&self, change: &StructuralChange) {
            self.0.lock().unwrap().push(change.property.clone());
        }
    }

    struct Panicker;

    impl ChangeListener for Panicker {
        fn structure_changed(&self, _change: &StructuralChange) {
            panic!("boom");
        }
    }

    fn change(property: &str) -> StructuralChange {
        let key = NodeKey::new();
        StructuralChange::new(key, key, property, None, Some(Value::from(1)))
    }

    #[test]
    fn add_fire_remove() {
        let listeners = ChangeListeners::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = listeners.add(recorder.clone());

        listeners.fire(&change("title"));
        assert_eq!(*recorder.0.lock().unwrap(), vec!["title".to_string()]);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.fire(&change("title"));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let listeners = ChangeListeners::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        listeners.add(Arc::new(Panicker));
        listeners.add(recorder.clone());

        listeners.fire(&change("fields.comment"));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn program_id_change_detection() {
        let root = NodeKey::new();
        let c = StructuralChange::new(root, root, PROGRAM_ID_PROPERTY, None, None);
        assert!(c.is_program_id_change());

        let child = StructuralChange::new(root, NodeKey::new(), PROGRAM_ID_PROPERTY, None, None);
        assert!(!child.is_program_id_change());
    }

    #[test]
    fn transient_builder() {
        assert!(change("selection").transient().transient);
        assert!(!change("title").transient);
    }
}
