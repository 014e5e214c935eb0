use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use spdb_index::{ProgramEvent, ProgramEventListener, ProgramManager};
use spdb_types::{DocumentKind, ListenerId, NodeKey, RootDocument};

use crate::dirty::{DirtyMarker, DirtySet};
use crate::error::{StoreError, StoreResult};
use crate::traits::Persister;

/// Outcome of storing a batch of dirty documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub stored: usize,
    pub failed: usize,
}

/// State shared between the manager, the index listener, and the flush
/// thread.
struct Shared<D: RootDocument> {
    kind: DocumentKind,
    persister: Arc<dyn Persister<D>>,
    dirty: Arc<DirtySet<D>>,
    markers: Mutex<HashMap<NodeKey, (Weak<D>, ListenerId)>>,
}

impl<D: RootDocument> Shared<D> {
    fn attach(&self, doc: &Arc<D>) {
        let id = doc.add_change_listener(Arc::new(DirtyMarker::new(doc, Arc::clone(&self.dirty))));
        let previous = self
            .markers
            .lock()
            .expect("marker table lock poisoned")
            .insert(doc.node_key(), (Arc::downgrade(doc), id));
        if let Some((old, old_id)) = previous {
            if let Some(old) = old.upgrade() {
                old.remove_change_listener(old_id);
            }
        }
    }

    fn detach(&self, key: &NodeKey) {
        let entry = self
            .markers
            .lock()
            .expect("marker table lock poisoned")
            .remove(key);
        if let Some((doc, id)) = entry {
            if let Some(doc) = doc.upgrade() {
                doc.remove_change_listener(id);
            }
        }
    }

    fn detach_all(&self) {
        let keys: Vec<NodeKey> = self
            .markers
            .lock()
            .expect("marker table lock poisoned")
            .keys()
            .copied()
            .collect();
        for key in keys {
            self.detach(&key);
        }
    }

    fn is_attached(&self, key: &NodeKey) -> bool {
        self.markers
            .lock()
            .expect("marker table lock poisoned")
            .contains_key(key)
    }

    fn added(&self, doc: &Arc<D>) {
        self.persister.restore(&doc.node_key());
        // Listen before the first store: a change racing the store still
        // marks the document dirty.
        self.attach(doc);
        self.store_now(doc);
    }

    /// The new document is written over the old record, which is never
    /// deleted in between.
    fn replaced(&self, old: &Arc<D>, new: &Arc<D>) {
        let key = new.node_key();
        if old.node_key() != key {
            self.removed(old);
            self.added(new);
            return;
        }
        self.attach(new);
        self.dirty.take(&key);
        self.store_now(new);
    }

    fn store_now(&self, doc: &Arc<D>) {
        if let Err(e) = self.persister.store(doc) {
            warn!(kind = %self.kind, key = %doc.node_key(), error = %e, "initial store failed; will retry");
            self.dirty.mark(Arc::clone(doc));
        }
    }

    fn removed(&self, doc: &Arc<D>) {
        let key = doc.node_key();
        self.detach(&key);
        self.dirty.take(&key);
        if let Err(e) = self.persister.remove(&key) {
            warn!(kind = %self.kind, key = %key, error = %e, "failed to delete record");
        }
    }

    /// Store every dirty document still attached. Failed documents are
    /// marked dirty again for the next cycle.
    fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        for doc in self.dirty.drain() {
            let key = doc.node_key();
            if !self.is_attached(&key) {
                continue;
            }
            match self.persister.store(&doc) {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        key = %key,
                        id = ?doc.program_id(),
                        error = %e,
                        "failed to store document"
                    );
                    self.dirty.mark(doc);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

impl<D: RootDocument> ProgramEventListener<D> for Shared<D> {
    fn program_changed(&self, event: &ProgramEvent<D>) {
        match event {
            ProgramEvent::Added { new } => self.added(new),
            ProgramEvent::Replaced { old, new } => self.replaced(old, new),
            ProgramEvent::Removed { old } => self.removed(old),
        }
    }
}

struct TimerState {
    interval: Duration,
    interval_changed: bool,
    stopped: bool,
}

/// Sleep/wake control for the flush thread.
struct FlushTimer {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl FlushTimer {
    fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(TimerState {
                interval,
                interval_changed: false,
                stopped: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Sleep one interval. Returns `false` once stopped. A new interval
    /// restarts the sleep.
    fn sleep(&self) -> bool {
        let mut state = self.state.lock().expect("flush timer lock poisoned");
        let mut deadline = Instant::now() + state.interval;
        loop {
            if state.stopped {
                return false;
            }
            if state.interval_changed {
                state.interval_changed = false;
                deadline = Instant::now() + state.interval;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = self
                .wake
                .wait_timeout(state, deadline - now)
                .expect("flush timer lock poisoned")
                .0;
        }
    }
}

/// Keeps one kind of root document durable.
///
/// On start the manager reloads stored documents into the index, then
/// listens to the index: added documents are stored at once and watched for
/// changes, removed documents have their record deleted. A background
/// thread stores the dirty documents once per storage interval.
pub struct StorageManager<D: RootDocument> {
    shared: Arc<Shared<D>>,
    index: Arc<ProgramManager<D>>,
    index_listener: Mutex<Option<ListenerId>>,
    timer: Arc<FlushTimer>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<D: RootDocument> StorageManager<D> {
    /// Reload, attach to the index, and start the flush thread.
    pub fn start(
        index: Arc<ProgramManager<D>>,
        persister: Arc<dyn Persister<D>>,
        interval: Duration,
    ) -> StoreResult<Self> {
        check_interval(interval)?;
        let kind = index.kind();

        let shared = Arc::new(Shared {
            kind,
            persister,
            dirty: Arc::new(DirtySet::new()),
            markers: Mutex::new(HashMap::new()),
        });

        let mut loaded = 0usize;
        for doc in shared.persister.reload_all(kind) {
            match index.put(Arc::clone(&doc)) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(kind = %kind, key = %doc.node_key(), error = %e, "skipping reloaded document"),
            }
        }
        for doc in index.list_all() {
            shared.attach(&doc);
        }
        let listener = index.add_listener(shared.clone());

        let timer = Arc::new(FlushTimer::new(interval));
        let thread = {
            let shared = Arc::clone(&shared);
            let timer = Arc::clone(&timer);
            thread::Builder::new()
                .name(format!("spdb-storage-{kind}"))
                .spawn(move || flush_loop(&shared, &timer))
        };
        let thread = match thread {
            Ok(handle) => handle,
            Err(e) => {
                index.remove_listener(listener);
                shared.detach_all();
                return Err(StoreError::Spawn(e.to_string()));
            }
        };

        info!(kind = %kind, loaded, interval_ms = interval.as_millis() as u64, "storage manager started");
        Ok(Self {
            shared,
            index,
            index_listener: Mutex::new(Some(listener)),
            timer,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.shared.kind
    }

    pub fn storage_interval(&self) -> Duration {
        self.timer.state.lock().expect("flush timer lock poisoned").interval
    }

    /// Change the flush interval. The sleeping flush thread is woken and
    /// waits the new interval from now.
    pub fn set_storage_interval(&self, interval: Duration) -> StoreResult<()> {
        check_interval(interval)?;
        {
            let mut state = self.timer.state.lock().expect("flush timer lock poisoned");
            state.interval = interval;
            state.interval_changed = true;
        }
        self.timer.wake.notify_all();
        info!(kind = %self.shared.kind, interval_ms = interval.as_millis() as u64, "storage interval changed");
        Ok(())
    }

    /// Store one document now and clear its dirty flag.
    pub fn checkpoint(&self, doc: &Arc<D>) -> StoreResult<()> {
        self.shared.dirty.take(&doc.node_key());
        if let Err(e) = self.shared.persister.store(doc) {
            self.shared.dirty.mark(Arc::clone(doc));
            return Err(e);
        }
        Ok(())
    }

    /// Store every dirty document now.
    pub fn checkpoint_all(&self) -> FlushReport {
        let report = self.shared.flush();
        if report.stored > 0 || report.failed > 0 {
            debug!(kind = %self.shared.kind, stored = report.stored, failed = report.failed, "checkpoint");
        }
        report
    }

    pub fn is_dirty(&self, key: &NodeKey) -> bool {
        self.shared.dirty.contains(key)
    }

    pub fn dirty_count(&self) -> usize {
        self.shared.dirty.len()
    }

    pub fn persister(&self) -> &Arc<dyn Persister<D>> {
        &self.shared.persister
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().expect("flush thread lock poisoned").is_some()
    }

    /// Detach from the index, stop the flush thread, and store what is
    /// still dirty. Idempotent.
    pub fn stop(&self) -> FlushReport {
        if let Some(listener) = self
            .index_listener
            .lock()
            .expect("listener lock poisoned")
            .take()
        {
            self.index.remove_listener(listener);
        }

        {
            let mut state = self.timer.state.lock().expect("flush timer lock poisoned");
            state.stopped = true;
        }
        self.timer.wake.notify_all();
        let handle = self.thread.lock().expect("flush thread lock poisoned").take();
        let Some(handle) = handle else {
            return FlushReport::default();
        };
        if handle.join().is_err() {
            error!(kind = %self.shared.kind, "flush thread panicked");
        }

        let report = self.shared.flush();
        self.shared.detach_all();
        info!(kind = %self.shared.kind, stored = report.stored, failed = report.failed, "storage manager stopped");
        report
    }
}

impl<D: RootDocument> Drop for StorageManager<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<D: RootDocument> std::fmt::Debug for StorageManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("kind", &self.shared.kind)
            .field("dirty", &self.dirty_count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn check_interval(interval: Duration) -> StoreResult<()> {
    if interval.is_zero() {
        return Err(StoreError::InvalidInterval(0));
    }
    Ok(())
}

fn flush_loop<D: RootDocument>(shared: &Shared<D>, timer: &FlushTimer) {
    debug!(kind = %shared.kind, "flush loop running");
    while timer.sleep() {
        let report = shared.flush();
        if report.stored > 0 || report.failed > 0 {
            debug!(kind = %shared.kind, stored = report.stored, failed = report.failed, "flushed dirty documents");
        }
    }
    debug!(kind = %shared.kind, "flush loop exited");
}
