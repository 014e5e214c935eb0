use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use spdb_types::{
    ChangeListener, ChangeListeners, DocumentKind, ListenerId, NodeKey, ProgramId, RootDocument,
    StructuralChange, PROGRAM_ID_PROPERTY,
};

/// Persisted form of an observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub key: NodeKey,
    /// 1-based number, unique within the document.
    pub number: u32,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

/// Persisted form of a [`MemDocument`]. Client-only fields are not part of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub key: NodeKey,
    pub kind: DocumentKind,
    pub program_id: Option<ProgramId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub observations: Vec<ObservationRecord>,
}

#[derive(Default)]
struct DocState {
    program_id: Option<ProgramId>,
    title: String,
    fields: BTreeMap<String, Value>,
    client_fields: BTreeMap<String, Value>,
    observations: Vec<ObservationRecord>,
}

/// In-memory root document.
///
/// Each setter updates the state under the internal lock, releases it, and
/// then notifies the registered change listeners.
pub struct MemDocument {
    key: NodeKey,
    kind: DocumentKind,
    state: RwLock<DocState>,
    listeners: ChangeListeners,
}

impl MemDocument {
    /// Create an empty document of the given kind with a fresh key.
    pub fn new(kind: DocumentKind, program_id: Option<ProgramId>) -> Self {
        Self::with_key(NodeKey::new(), kind, program_id)
    }

    pub fn with_key(key: NodeKey, kind: DocumentKind, program_id: Option<ProgramId>) -> Self {
        Self {
            key,
            kind,
            state: RwLock::new(DocState {
                program_id,
                ..DocState::default()
            }),
            listeners: ChangeListeners::new(),
        }
    }

    /// Shorthand for a shared program document.
    pub fn program(program_id: Option<ProgramId>) -> Arc<Self> {
        Arc::new(Self::new(DocumentKind::Program, program_id))
    }

    /// Shorthand for a shared nightly-record document.
    pub fn nightly_record(program_id: Option<ProgramId>) -> Arc<Self> {
        Arc::new(Self::new(DocumentKind::NightlyRecord, program_id))
    }

    pub fn from_record(record: DocumentRecord) -> Self {
        Self {
            key: record.key,
            kind: record.kind,
            state: RwLock::new(DocState {
                program_id: record.program_id,
                title: record.title,
                fields: record.fields,
                client_fields: BTreeMap::new(),
                observations: record.observations,
            }),
            listeners: ChangeListeners::new(),
        }
    }

    pub fn to_record(&self) -> DocumentRecord {
        let state = self.state.read().expect("document lock poisoned");
        DocumentRecord {
            key: self.key,
            kind: self.kind,
            program_id: state.program_id.clone(),
            title: state.title.clone(),
            fields: state.fields.clone(),
            observations: state.observations.clone(),
        }
    }

    // ---------------------------------------------------------------
    // Root properties
    // ---------------------------------------------------------------

    pub fn set_program_id(&self, program_id: Option<ProgramId>) {
        let old = {
            let mut state = self.state.write().expect("document lock poisoned");
            std::mem::replace(&mut state.program_id, program_id.clone())
        };
        if old == program_id {
            return;
        }
        self.fire(StructuralChange::new(
            self.key,
            self.key,
            PROGRAM_ID_PROPERTY,
            old.map(|id| Value::String(id.to_string())),
            program_id.map(|id| Value::String(id.to_string())),
        ));
    }

    pub fn title(&self) -> String {
        self.state.read().expect("document lock poisoned").title.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        let old = {
            let mut state = self.state.write().expect("document lock poisoned");
            std::mem::replace(&mut state.title, title.clone())
        };
        self.fire(StructuralChange::new(
            self.key,
            self.key,
            "title",
            Some(Value::String(old)),
            Some(Value::String(title)),
        ));
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.state
            .read()
            .expect("document lock poisoned")
            .fields
            .get(name)
            .cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        let old = self
            .state
            .write()
            .expect("document lock poisoned")
            .fields
            .insert(name.to_string(), value.clone());
        self.fire(StructuralChange::new(self.key, self.key, name, old, Some(value)));
    }

    /// Remove a field. Returns the old value, if any.
    pub fn remove_field(&self, name: &str) -> Option<Value> {
        let old = self
            .state
            .write()
            .expect("document lock poisoned")
            .fields
            .remove(name);
        if old.is_some() {
            self.fire(StructuralChange::new(self.key, self.key, name, old.clone(), None));
        }
        old
    }

    pub fn client_field(&self, name: &str) -> Option<Value> {
        self.state
            .read()
            .expect("document lock poisoned")
            .client_fields
            .get(name)
            .cloned()
    }

    /// Set a client-only field. The change is raised as transient and is
    /// never persisted.
    pub fn set_client_field(&self, name: &str, value: Value) {
        let old = self
            .state
            .write()
            .expect("document lock poisoned")
            .client_fields
            .insert(name.to_string(), value.clone());
        self.fire(StructuralChange::new(self.key, self.key, name, old, Some(value)).transient());
    }

    // ---------------------------------------------------------------
    // Observations
    // ---------------------------------------------------------------

    /// Append a new observation and return its key.
    pub fn add_observation(&self) -> NodeKey {
        let key = NodeKey::new();
        let number = {
            let mut state = self.state.write().expect("document lock poisoned");
            let number = state.observations.iter().map(|o| o.number).max().unwrap_or(0) + 1;
            state.observations.push(ObservationRecord {
                key,
                number,
                fields: BTreeMap::new(),
            });
            number
        };
        self.fire(StructuralChange::new(
            self.key,
            self.key,
            "observations",
            None,
            Some(Value::from(number)),
        ));
        key
    }

    /// Number of the observation with the given key.
    pub fn observation_number(&self, key: &NodeKey) -> Option<u32> {
        self.state
            .read()
            .expect("document lock poisoned")
            .observations
            .iter()
            .find(|o| o.key == *key)
            .map(|o| o.number)
    }

    pub fn observation_field(&self, key: &NodeKey, name: &str) -> Option<Value> {
        self.state
            .read()
            .expect("document lock poisoned")
            .observations
            .iter()
            .find(|o| o.key == *key)
            .and_then(|o| o.fields.get(name).cloned())
    }

    /// Set a field on an observation. Returns `false` if the observation
    /// does not belong to this document.
    pub fn set_observation_field(&self, key: &NodeKey, name: &str, value: Value) -> bool {
        let old = {
            let mut state = self.state.write().expect("document lock poisoned");
            match state.observations.iter_mut().find(|o| o.key == *key) {
                Some(obs) => obs.fields.insert(name.to_string(), value.clone()),
                None => return false,
            }
        };
        self.fire(StructuralChange::new(self.key, *key, name, old, Some(value)));
        true
    }

    fn fire(&self, change: StructuralChange) {
        self.listeners.fire(&change);
    }
}

impl RootDocument for MemDocument {
    fn node_key(&self) -> NodeKey {
        self.key
    }

    fn program_id(&self) -> Option<ProgramId> {
        self.state
            .read()
            .expect("document lock poisoned")
            .program_id
            .clone()
    }

    fn kind(&self) -> DocumentKind {
        self.kind
    }

    fn observation_keys(&self) -> Vec<NodeKey> {
        self.state
            .read()
            .expect("document lock poisoned")
            .observations
            .iter()
            .map(|o| o.key)
            .collect()
    }

    fn find_observation(&self, number: u32) -> Option<NodeKey> {
        self.state
            .read()
            .expect("document lock poisoned")
            .observations
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.key)
    }

    fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

impl std::fmt::Debug for MemDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDocument")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("program_id", &self.program_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StructuralChange>>);

    impl ChangeListener for Recorder {
        fn structure_changed(&self, change: &StructuralChange) {
            self.0.lock().unwrap().push(change.clone());
        }
    }

    fn pid(s: &str) -> ProgramId {
        ProgramId::new(s).unwrap()
    }

    #[test]
    fn edits_raise_changes() {
        let doc = MemDocument::program(Some(pid("P-1")));
        let recorder = Arc::new(Recorder::default());
        doc.add_change_listener(recorder.clone());

        doc.set_field("comment", Value::from("hello"));
        doc.set_title("Survey");

        let changes = recorder.0.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].property, "comment");
        assert_eq!(changes[0].new_value, Some(Value::from("hello")));
        assert!(!changes[0].transient);
        assert_eq!(changes[1].property, "title");
    }

    #[test]
    fn client_fields_are_transient_and_not_recorded() {
        let doc = MemDocument::program(None);
        let recorder = Arc::new(Recorder::default());
        doc.add_change_listener(recorder.clone());

        doc.set_client_field("selection", Value::from(3));
        assert!(recorder.0.lock().unwrap()[0].transient);
        assert_eq!(doc.client_field("selection"), Some(Value::from(3)));

        let restored = MemDocument::from_record(doc.to_record());
        assert_eq!(restored.client_field("selection"), None);
    }

    #[test]
    fn program_id_change_fires_once() {
        let doc = MemDocument::program(Some(pid("P-1")));
        let recorder = Arc::new(Recorder::default());
        doc.add_change_listener(recorder.clone());

        doc.set_program_id(Some(pid("P-1")));
        assert!(recorder.0.lock().unwrap().is_empty());

        doc.set_program_id(Some(pid("P-2")));
        let changes = recorder.0.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_program_id_change());
        assert_eq!(doc.program_id(), Some(pid("P-2")));
    }

    #[test]
    fn observations_are_numbered_from_one() {
        let doc = MemDocument::program(Some(pid("P-1")));
        let o1 = doc.add_observation();
        let o2 = doc.add_observation();

        assert_eq!(doc.observation_keys(), vec![o1, o2]);
        assert_eq!(doc.find_observation(2), Some(o2));
        assert_eq!(doc.observation_number(&o1), Some(1));
        assert_eq!(doc.find_observation(3), None);
    }

    #[test]
    fn observation_field_change_names_modified_node() {
        let doc = MemDocument::program(None);
        let obs = doc.add_observation();
        let recorder = Arc::new(Recorder::default());
        doc.add_change_listener(recorder.clone());

        assert!(doc.set_observation_field(&obs, "status", Value::from("READY")));
        assert!(!doc.set_observation_field(&NodeKey::new(), "status", Value::from("x")));

        let changes = recorder.0.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].root, doc.node_key());
        assert_eq!(changes[0].modified_node, obs);
    }

    #[test]
    fn removed_listener_is_silent() {
        let doc = MemDocument::program(None);
        let recorder = Arc::new(Recorder::default());
        let id = doc.add_change_listener(recorder.clone());
        assert!(doc.remove_change_listener(id));

        doc.set_field("x", Value::from(1));
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
