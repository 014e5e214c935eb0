use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use spdb_exec::Executor;
use spdb_index::ProgramManager;
use spdb_store::{FlushReport, KeyLocks, Persister, StorageManager, StoreResult};
use spdb_trigger::TriggerRegistrar;
use spdb_types::{DocumentKind, RootDocument};

use crate::config::DatabaseConfig;
use crate::error::DbResult;

/// How long shutdown waits for running trigger actions.
const TRIGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns and wires the components of one database instance.
///
/// Construction order matters: each storage manager reloads its documents
/// into its index before the trigger registrar attaches, so reloaded
/// documents are subscribed without being stored again.
pub struct DatabaseManager<D: RootDocument> {
    uuid: Uuid,
    programs: Arc<ProgramManager<D>>,
    nightly_records: Arc<ProgramManager<D>>,
    program_storage: StorageManager<D>,
    record_storage: StorageManager<D>,
    persister: Arc<dyn Persister<D>>,
    locks: Arc<KeyLocks>,
    executor: Executor,
    triggers: Arc<TriggerRegistrar<D>>,
    shut_down: AtomicBool,
}

impl<D: RootDocument> DatabaseManager<D> {
    pub fn new(
        uuid: Uuid,
        persister: Arc<dyn Persister<D>>,
        locks: Arc<KeyLocks>,
        config: &DatabaseConfig,
    ) -> DbResult<Self> {
        config.validate()?;
        let interval = config.storage_interval();

        let programs = ProgramManager::new(DocumentKind::Program);
        let nightly_records = ProgramManager::new(DocumentKind::NightlyRecord);
        let program_storage = StorageManager::start(Arc::clone(&programs), Arc::clone(&persister), interval)?;
        let record_storage = StorageManager::start(Arc::clone(&nightly_records), Arc::clone(&persister), interval)?;

        let triggers = Arc::new(TriggerRegistrar::new(config.trigger_workers)?);
        triggers.attach(&programs);
        triggers.attach(&nightly_records);

        let executor = Executor::new(&config.exec)?;

        info!(
            uuid = %uuid,
            programs = programs.len(),
            nightly_records = nightly_records.len(),
            durable = persister.is_durable(),
            "database started"
        );

        Ok(Self {
            uuid,
            programs,
            nightly_records,
            program_storage,
            record_storage,
            persister,
            locks,
            executor,
            triggers,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn index(&self, kind: DocumentKind) -> &Arc<ProgramManager<D>> {
        match kind {
            DocumentKind::Program => &self.programs,
            DocumentKind::NightlyRecord => &self.nightly_records,
        }
    }

    pub fn programs(&self) -> &Arc<ProgramManager<D>> {
        &self.programs
    }

    pub fn nightly_records(&self) -> &Arc<ProgramManager<D>> {
        &self.nightly_records
    }

    pub fn storage(&self, kind: DocumentKind) -> &StorageManager<D> {
        match kind {
            DocumentKind::Program => &self.program_storage,
            DocumentKind::NightlyRecord => &self.record_storage,
        }
    }

    pub fn persister(&self) -> &Arc<dyn Persister<D>> {
        &self.persister
    }

    pub fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn triggers(&self) -> &Arc<TriggerRegistrar<D>> {
        &self.triggers
    }

    pub fn storage_interval(&self) -> Duration {
        self.program_storage.storage_interval()
    }

    pub fn set_storage_interval(&self, interval: Duration) -> StoreResult<()> {
        self.program_storage.set_storage_interval(interval)?;
        self.record_storage.set_storage_interval(interval)
    }

    /// Store every dirty document of both kinds now.
    pub fn checkpoint_all(&self) -> FlushReport {
        let programs = self.program_storage.checkpoint_all();
        let records = self.record_storage.checkpoint_all();
        FlushReport {
            stored: programs.stored + records.stored,
            failed: programs.failed + records.failed,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Flush and stop storage, release triggers, and empty the indexes.
    /// Stored records are kept. Returns `false` if already shut down.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        let programs = self.program_storage.stop();
        let records = self.record_storage.stop();
        self.triggers.shutdown(TRIGGER_DRAIN_TIMEOUT);
        self.programs.clear();
        self.nightly_records.clear();

        info!(
            uuid = %self.uuid,
            stored = programs.stored + records.stored,
            failed = programs.failed + records.failed,
            "database shut down"
        );
        true
    }
}

impl<D: RootDocument> Drop for DatabaseManager<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: RootDocument> std::fmt::Debug for DatabaseManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("uuid", &self.uuid)
            .field("programs", &self.programs.len())
            .field("nightly_records", &self.nightly_records.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
