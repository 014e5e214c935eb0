use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};
use uuid::Uuid;

use spdb_exec::{
    Functor, FunctorMessage, FunctorRegistry, FunctorReply, MessageTarget, Principals, RemoteFunctor,
};
use spdb_index::ProgramEventListener;
use spdb_store::{FilePersister, FlushReport, KeyLocks, Persister, TransientPersister};
use spdb_trigger::{TriggerAction, TriggerCondition};
use spdb_types::{DocumentCodec, DocumentKind, ListenerId, NodeKey, ObservationId, ProgramId, RootDocument};

use crate::admin::DbAdmin;
use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use crate::functors::{ListIds, LIST_IDS_TAG};
use crate::manager::DatabaseManager;
use crate::node::{Node, ObservationNode};
use crate::query::QueryRunner;
use crate::uuid_file;

/// Versioned subdirectory of the database root that holds the records.
pub const STORAGE_DIR: &str = "v1";

/// An embedded science-program database.
pub struct LocalDatabase<D: RootDocument> {
    manager: DatabaseManager<D>,
    registry: FunctorRegistry<LocalDatabase<D>, Node<D>>,
    config: DatabaseConfig,
}

impl<D: RootDocument> LocalDatabase<D> {
    /// Open (or create) a durable database under `root`.
    ///
    /// Records live in `<root>/v1`; the database uuid in `<root>/uuid`.
    pub fn create(
        root: impl AsRef<Path>,
        codec: Arc<dyn DocumentCodec<D>>,
        config: DatabaseConfig,
    ) -> DbResult<Self> {
        let root = root.as_ref();
        let dir = Self::storage_dir(root);
        let locks = Arc::new(KeyLocks::new());
        let persister = FilePersister::open(&dir, codec, Arc::clone(&locks))?;
        let uuid = uuid_file::load_or_create(root)?;

        info!(root = %root.display(), uuid = %uuid, "opening database");
        Self::with_persister(uuid, Arc::new(persister), locks, config)
    }

    /// A database that keeps nothing on disk.
    pub fn create_transient(config: DatabaseConfig) -> DbResult<Self> {
        Self::with_persister(
            Uuid::new_v4(),
            Arc::new(TransientPersister),
            Arc::new(KeyLocks::new()),
            config,
        )
    }

    /// Assemble a database over any persister.
    pub fn with_persister(
        uuid: Uuid,
        persister: Arc<dyn Persister<D>>,
        locks: Arc<KeyLocks>,
        config: DatabaseConfig,
    ) -> DbResult<Self> {
        let manager = DatabaseManager::new(uuid, persister, locks, &config)?;
        let registry = FunctorRegistry::new();
        registry.register(LIST_IDS_TAG, |payload| {
            Ok(Box::new(ListIds::<D>::from_payload(payload)?) as Box<dyn RemoteFunctor<Self, Node<D>>>)
        });

        Ok(Self {
            manager,
            registry,
            config,
        })
    }

    /// Directory holding the records of a database rooted at `root`.
    pub fn storage_dir(root: &Path) -> PathBuf {
        root.join(STORAGE_DIR)
    }

    pub fn uuid(&self) -> Uuid {
        self.manager.uuid()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn manager(&self) -> &DatabaseManager<D> {
        &self.manager
    }

    // ---------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------

    /// Add or replace a root document in the index for its kind.
    ///
    /// Returns the document previously stored under the same key. Fails if
    /// the document's program id belongs to another document.
    pub fn put(&self, doc: Arc<D>) -> DbResult<Option<Arc<D>>> {
        if self.manager.is_shut_down() {
            return Err(DbError::ShutDown);
        }
        debug!(key = %doc.node_key(), kind = %doc.kind(), "put");
        Ok(self.manager.index(doc.kind()).put(doc)?)
    }

    /// Remove a root document of either kind. Its record is deleted.
    pub fn remove(&self, key: &NodeKey) -> bool {
        self.manager.programs().remove(key) || self.manager.nightly_records().remove(key)
    }

    /// Remove the program with the given id.
    pub fn remove_by_id(&self, id: &ProgramId) -> bool {
        match self.manager.programs().lookup_key_by_id(id) {
            Some(key) => self.manager.programs().remove(&key),
            None => false,
        }
    }

    /// Remove a program, returning it.
    pub fn remove_program(&self, key: &NodeKey) -> Option<Arc<D>> {
        self.manager.programs().take(key)
    }

    pub fn remove_nightly_record(&self, key: &NodeKey) -> bool {
        self.manager.nightly_records().remove(key)
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    pub fn lookup_program(&self, key: &NodeKey) -> Option<Arc<D>> {
        self.manager.programs().lookup(key)
    }

    pub fn lookup_program_by_id(&self, id: &ProgramId) -> Option<Arc<D>> {
        self.manager.programs().lookup_by_id(id)
    }

    pub fn lookup_program_key_by_id(&self, id: &ProgramId) -> Option<NodeKey> {
        self.manager.programs().lookup_key_by_id(id)
    }

    pub fn lookup_nightly_record(&self, key: &NodeKey) -> Option<Arc<D>> {
        self.manager.nightly_records().lookup(key)
    }

    pub fn lookup_nightly_record_by_id(&self, id: &ProgramId) -> Option<Arc<D>> {
        self.manager.nightly_records().lookup_by_id(id)
    }

    /// Find an observation by `<program-id>-<number>`.
    pub fn lookup_observation_by_id(&self, id: &ObservationId) -> Option<ObservationNode<D>> {
        let program = self.lookup_program_by_id(&id.program_id)?;
        let key = program.find_observation(id.number)?;
        Some(ObservationNode { program, key })
    }

    /// Resolve any key this database holds: a program, a nightly record, or
    /// an observation inside a program.
    pub fn resolve(&self, key: &NodeKey) -> Option<Node<D>> {
        if let Some(doc) = self.lookup_program(key) {
            return Some(Node::Program(doc));
        }
        if let Some(doc) = self.lookup_nightly_record(key) {
            return Some(Node::NightlyRecord(doc));
        }
        self.manager
            .programs()
            .list_all()
            .into_iter()
            .find(|p| p.observation_keys().contains(key))
            .map(|program| Node::Observation(ObservationNode { program, key: *key }))
    }

    // ---------------------------------------------------------------
    // Storage
    // ---------------------------------------------------------------

    /// Store one document now.
    pub fn checkpoint(&self, doc: &Arc<D>) -> DbResult<()> {
        Ok(self.manager.storage(doc.kind()).checkpoint(doc)?)
    }

    /// Store every dirty document now.
    pub fn checkpoint_all(&self) -> FlushReport {
        self.manager.checkpoint_all()
    }

    /// Size in bytes of a document's record, if it has one.
    pub fn file_size(&self, key: &NodeKey) -> Option<u64> {
        self.manager.persister().size_of(key)
    }

    /// The lock held for reading while a document is serialized. Take the
    /// write side to keep a multi-step edit out of storage.
    pub fn document_lock(&self, key: &NodeKey) -> Arc<RwLock<()>> {
        self.manager.locks().lock_for(key)
    }

    // ---------------------------------------------------------------
    // Functors
    // ---------------------------------------------------------------

    /// Run a functor once, against the node with key `target` if given.
    ///
    /// Failures inside the functor are recorded on it; the only error
    /// returned here is an unknown target.
    pub fn execute<F>(&self, mut functor: F, target: Option<&NodeKey>, principals: &Principals) -> DbResult<F>
    where
        F: Functor<Self, Node<D>>,
    {
        let node = match target {
            Some(key) => Some(self.resolve(key).ok_or(DbError::NotLocal(*key))?),
            None => None,
        };
        self.manager
            .executor()
            .execute(&mut functor, self, node.as_ref(), principals);
        Ok(functor)
    }

    pub fn query_runner<'a>(&'a self, principals: &'a Principals) -> QueryRunner<'a, D> {
        QueryRunner::new(self, principals)
    }

    /// Functor behaviors available to [`execute_message`](Self::execute_message).
    pub fn functors(&self) -> &FunctorRegistry<Self, Node<D>> {
        &self.registry
    }

    /// Build the functor a message names and run it against `target`.
    pub fn execute_message(
        &self,
        message: &FunctorMessage,
        target: MessageTarget,
        principals: &Principals,
    ) -> DbResult<FunctorReply> {
        let mut functor = self.registry.build(message)?;
        let runner = self.query_runner(principals);
        match target {
            MessageTarget::Node(key) => {
                let node = self.resolve(&key).ok_or(DbError::NotLocal(key))?;
                self.manager
                    .executor()
                    .execute(&mut *functor, self, Some(&node), principals);
            }
            MessageTarget::Programs => runner.run_programs(&mut *functor),
            MessageTarget::NightlyRecords => runner.run_nightly_records(&mut *functor),
            MessageTarget::Observations => runner.run_observations(&mut *functor),
        }
        Ok(FunctorReply::from_functor(&message.tag, &*functor))
    }

    // ---------------------------------------------------------------
    // Triggers and listeners
    // ---------------------------------------------------------------

    pub fn register_trigger(&self, condition: Arc<dyn TriggerCondition>, action: Arc<dyn TriggerAction>) {
        self.manager.triggers().register(condition, action);
    }

    pub fn unregister_trigger(&self, condition: &Arc<dyn TriggerCondition>, action: &Arc<dyn TriggerAction>) -> bool {
        self.manager.triggers().unregister(condition, action)
    }

    pub fn add_program_listener(&self, listener: Arc<dyn ProgramEventListener<D>>) -> ListenerId {
        self.manager.programs().add_listener(listener)
    }

    pub fn remove_program_listener(&self, id: ListenerId) -> bool {
        self.manager.programs().remove_listener(id)
    }

    pub fn add_nightly_record_listener(&self, listener: Arc<dyn ProgramEventListener<D>>) -> ListenerId {
        self.manager.nightly_records().add_listener(listener)
    }

    pub fn remove_nightly_record_listener(&self, id: ListenerId) -> bool {
        self.manager.nightly_records().remove_listener(id)
    }

    // ---------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------

    pub fn admin(&self) -> DbAdmin<'_, D> {
        DbAdmin::new(self)
    }

    /// Number of root documents of a kind.
    pub fn count(&self, kind: DocumentKind) -> usize {
        self.manager.index(kind).len()
    }
}

impl<D: RootDocument> std::fmt::Debug for LocalDatabase<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDatabase")
            .field("manager", &self.manager)
            .field("functors", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    use serde_json::Value;
    use spdb_exec::{FunctorError, Priority, QueryFunctor};
    use spdb_index::{IndexError, ProgramEvent};
    use spdb_model::{JsonCodec, MemDocument};
    use spdb_trigger::TriggerToken;
    use spdb_types::StructuralChange;

    type Db = LocalDatabase<MemDocument>;

    fn pid(s: &str) -> ProgramId {
        ProgramId::new(s).unwrap()
    }

    fn config(interval_ms: u64) -> DatabaseConfig {
        DatabaseConfig {
            storage_interval_ms: interval_ms,
            trigger_workers: 4,
            ..DatabaseConfig::default()
        }
    }

    fn open(root: &Path, interval_ms: u64) -> Db {
        Db::create(root, Arc::new(JsonCodec), config(interval_ms)).unwrap()
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    /// Records the title of the target node.
    #[derive(Default)]
    struct ReadTitle {
        title: Option<String>,
        error: Option<FunctorError>,
    }

    impl Functor<Db, Node<MemDocument>> for ReadTitle {
        fn priority(&self) -> Priority {
            Priority::High
        }
        fn execute(&mut self, _db: &Db, node: Option<&Node<MemDocument>>, _: &Principals) -> anyhow::Result<()> {
            let node = node.ok_or_else(|| anyhow::anyhow!("needs a target"))?;
            self.title = Some(node.root_document().title());
            Ok(())
        }
        fn set_error(&mut self, error: FunctorError) {
            self.error = Some(error);
        }
        fn error(&self) -> Option<&FunctorError> {
            self.error.as_ref()
        }
    }

    #[test]
    fn end_to_end_put_mutate_flush_remove() {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let db = open(tmp.path(), 20);
        let record = tmp.path().join(STORAGE_DIR).join("P-1.sp");

        let d1 = MemDocument::program(Some(pid("P-1")));
        let k1 = d1.node_key();
        assert!(db.put(d1.clone()).unwrap().is_none());

        d1.set_field("comment", Value::from("seeing was poor"));
        assert!(wait_until(|| {
            fs::read_to_string(&record).map_or(false, |s| s.contains("seeing was poor"))
        }));

        assert!(db.remove(&k1));
        assert!(!record.exists());
        assert!(db.lookup_program_by_id(&pid("P-1")).is_none());
    }

    #[test]
    fn conflicting_put_names_both_keys() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let d1 = MemDocument::program(Some(pid("P-1")));
        let d2 = MemDocument::program(Some(pid("P-1")));
        db.put(d1.clone()).unwrap();

        let err = db.put(d2.clone()).unwrap_err();

        assert!(err.is_conflict());
        match err {
            DbError::Index(IndexError::IdClash { existing, incoming, .. }) => {
                assert_eq!(existing, d1.node_key());
                assert_eq!(incoming, d2.node_key());
            }
            other => panic!("unexpected {other}"),
        }
        assert!(db.lookup_program(&d2.node_key()).is_none());
    }

    #[test]
    fn documents_route_by_kind() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let program = MemDocument::program(Some(pid("P-1")));
        let record = MemDocument::nightly_record(Some(pid("P-1")));
        db.put(program.clone()).unwrap();
        db.put(record.clone()).unwrap();

        assert_eq!(db.count(DocumentKind::Program), 1);
        assert_eq!(db.count(DocumentKind::NightlyRecord), 1);
        assert!(db.lookup_nightly_record_by_id(&pid("P-1")).is_some());
        assert!(db.lookup_program(&record.node_key()).is_none());

        assert!(db.remove_nightly_record(&record.node_key()));
        assert!(!db.remove_nightly_record(&record.node_key()));
        assert!(Arc::ptr_eq(&db.remove_program(&program.node_key()).unwrap(), &program));
        assert!(db.remove_program(&program.node_key()).is_none());
    }

    #[test]
    fn remove_by_id_and_key_lookup() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let doc = MemDocument::program(Some(pid("P-7")));
        db.put(doc.clone()).unwrap();

        assert_eq!(db.lookup_program_key_by_id(&pid("P-7")), Some(doc.node_key()));
        assert!(db.remove_by_id(&pid("P-7")));
        assert!(!db.remove_by_id(&pid("P-7")));
    }

    #[test]
    fn observation_lookup_by_id() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let doc = MemDocument::program(Some(pid("GS-2024A-Q-1")));
        doc.add_observation();
        let second = doc.add_observation();
        db.put(doc.clone()).unwrap();

        let id: ObservationId = "GS-2024A-Q-1-2".parse().unwrap();
        let obs = db.lookup_observation_by_id(&id).unwrap();
        assert_eq!(obs.key, second);
        assert!(Arc::ptr_eq(&obs.program, &doc));

        let missing: ObservationId = "GS-2024A-Q-1-3".parse().unwrap();
        assert!(db.lookup_observation_by_id(&missing).is_none());
        assert!(matches!(db.resolve(&second), Some(Node::Observation(_))));
    }

    #[test]
    fn execute_against_target() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let doc = MemDocument::program(None);
        doc.set_title("Deep field");
        db.put(doc.clone()).unwrap();

        let f = db
            .execute(ReadTitle::default(), Some(&doc.node_key()), &Principals::new())
            .unwrap();
        assert_eq!(f.title.as_deref(), Some("Deep field"));
        assert!(f.error().is_none());
    }

    #[test]
    fn execute_unknown_target_is_not_local() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let missing = NodeKey::new();
        let err = db
            .execute(ReadTitle::default(), Some(&missing), &Principals::new())
            .err()
            .unwrap();
        assert!(matches!(err, DbError::NotLocal(k) if k == missing));
    }

    #[test]
    fn execute_failure_is_recorded_on_functor() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let f = db.execute(ReadTitle::default(), None, &Principals::new()).unwrap();
        assert!(f.title.is_none());
        assert!(matches!(f.error(), Some(FunctorError::Failed { .. })));
    }

    #[test]
    fn list_ids_message_over_programs() {
        let db = Db::create_transient(config(10_000)).unwrap();
        db.put(MemDocument::program(Some(pid("A")))).unwrap();
        db.put(MemDocument::program(None)).unwrap();
        db.put(MemDocument::program(Some(pid("B")))).unwrap();

        let reply = db
            .execute_message(
                &FunctorMessage::new(LIST_IDS_TAG, Value::Null),
                MessageTarget::Programs,
                &Principals::new(),
            )
            .unwrap();

        assert!(reply.is_ok());
        assert_eq!(reply.payload, serde_json::json!(["A", "B"]));
    }

    #[test]
    fn unknown_message_tag_is_an_error() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let err = db
            .execute_message(
                &FunctorMessage::new("spdb.nope", Value::Null),
                MessageTarget::Programs,
                &Principals::new(),
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Exec(spdb_exec::ExecError::UnknownFunctor(_))));
    }

    #[test]
    fn trigger_fires_for_stored_documents() {
        struct TitleSet;
        impl TriggerCondition for TitleSet {
            fn matches(&self, change: &StructuralChange) -> Option<TriggerToken> {
                (change.property == "title").then(|| change.new_value.clone().unwrap_or(Value::Null))
            }
        }
        struct Notify(Mutex<mpsc::Sender<TriggerToken>>);
        impl TriggerAction for Notify {
            fn run(&self, _: &StructuralChange, token: &TriggerToken) -> anyhow::Result<()> {
                self.0.lock().unwrap().send(token.clone())?;
                Ok(())
            }
        }

        let db = Db::create_transient(config(10_000)).unwrap();
        let (tx, rx) = mpsc::channel();
        db.register_trigger(Arc::new(TitleSet), Arc::new(Notify(Mutex::new(tx))));

        let record = MemDocument::nightly_record(None);
        db.put(record.clone()).unwrap();
        record.set_title("2024-03-01");

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Value::from("2024-03-01"));
    }

    #[test]
    fn program_listeners_see_events() {
        struct Count(Mutex<Vec<&'static str>>);
        impl ProgramEventListener<MemDocument> for Count {
            fn program_changed(&self, event: &ProgramEvent<MemDocument>) {
                self.0.lock().unwrap().push(event.name());
            }
        }

        let db = Db::create_transient(config(10_000)).unwrap();
        let listener = Arc::new(Count(Mutex::new(Vec::new())));
        let id = db.add_program_listener(listener.clone());
        let doc = MemDocument::program(None);
        db.put(doc.clone()).unwrap();
        db.remove(&doc.node_key());
        assert!(db.remove_program_listener(id));
        db.put(MemDocument::program(None)).unwrap();

        assert_eq!(*listener.0.lock().unwrap(), vec!["added", "removed"]);
    }

    #[test]
    fn reopen_restores_documents_and_uuid() {
        let tmp = tempfile::tempdir().unwrap();
        let (uuid, key) = {
            let db = open(tmp.path(), 10_000);
            let doc = MemDocument::program(Some(pid("P-1")));
            db.put(doc.clone()).unwrap();
            doc.set_title("kept across restarts");
            (db.uuid(), doc.node_key())
        };

        let db = open(tmp.path(), 10_000);
        assert_eq!(db.uuid(), uuid);
        let doc = db.lookup_program(&key).unwrap();
        assert_eq!(doc.title(), "kept across restarts");
        assert!(db.file_size(&key).unwrap() > 0);
    }

    #[test]
    fn shutdown_keeps_records_and_refuses_puts() {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let db = open(tmp.path(), 10_000);
        let doc = MemDocument::program(Some(pid("P-1")));
        db.put(doc.clone()).unwrap();
        doc.set_title("flushed at shutdown");

        db.admin().shutdown();

        assert_eq!(db.count(DocumentKind::Program), 0);
        let text = fs::read_to_string(tmp.path().join(STORAGE_DIR).join("P-1.sp")).unwrap();
        assert!(text.contains("flushed at shutdown"));
        assert!(matches!(db.put(MemDocument::program(None)), Err(DbError::ShutDown)));
    }

    #[test]
    fn storage_dir_must_be_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(STORAGE_DIR), b"oops").unwrap();
        let err = Db::create(tmp.path(), Arc::new(JsonCodec), config(10_000)).unwrap_err();
        assert!(matches!(err, DbError::Store(spdb_store::StoreError::NotADirectory(_))));
    }

    #[test]
    fn document_lock_is_shared_per_key() {
        let db = Db::create_transient(config(10_000)).unwrap();
        let key = NodeKey::new();
        assert!(Arc::ptr_eq(&db.document_lock(&key), &db.document_lock(&key)));
    }

    #[test]
    fn query_functor_trait_is_usable_on_database() {
        #[derive(Default)]
        struct FirstTwo {
            seen: Vec<NodeKey>,
            error: Option<FunctorError>,
        }
        impl Functor<Db, Node<MemDocument>> for FirstTwo {
            fn execute(&mut self, _: &Db, node: Option<&Node<MemDocument>>, _: &Principals) -> anyhow::Result<()> {
                self.seen.extend(node.map(Node::key));
                Ok(())
            }
            fn set_error(&mut self, error: FunctorError) {
                self.error = Some(error);
            }
            fn error(&self) -> Option<&FunctorError> {
                self.error.as_ref()
            }
        }
        impl QueryFunctor<Db, Node<MemDocument>> for FirstTwo {
            fn is_done(&self) -> bool {
                self.seen.len() == 2
            }
        }

        let db = Db::create_transient(config(10_000)).unwrap();
        let keys: Vec<NodeKey> = (0..4)
            .map(|_| {
                let doc = MemDocument::program(None);
                db.put(doc.clone()).unwrap();
                doc.node_key()
            })
            .collect();

        let f = db.query_runner(&Principals::new()).query_programs(FirstTwo::default());
        assert_eq!(f.seen, keys[..2].to_vec());
    }
}
