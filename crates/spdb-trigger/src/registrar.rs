use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tracing::{debug, error, info};

use spdb_index::{ProgramEvent, ProgramEventListener, ProgramManager};
use spdb_types::{ChangeListener, ListenerId, NodeKey, RootDocument, StructuralChange};

use crate::error::TriggerResult;
use crate::pool::{job_label, PoolStats, WorkerPool};
use crate::trigger::{TriggerAction, TriggerCondition};

/// Identity of a registered condition or action: the address of its `Arc`.
type Identity = usize;

fn identity<T: ?Sized>(item: &Arc<T>) -> Identity {
    Arc::as_ptr(item) as *const () as usize
}

/// A condition and the actions registered under it, in registration order.
/// The same action may appear more than once.
struct Registration {
    condition: Arc<dyn TriggerCondition>,
    actions: Vec<Arc<dyn TriggerAction>>,
}

/// Matches changes against conditions and queues the actions.
struct Dispatcher {
    registrations: RwLock<HashMap<Identity, Registration>>,
    pool: WorkerPool,
}

impl ChangeListener for Dispatcher {
    fn structure_changed(&self, change: &StructuralChange) {
        let snapshot: Vec<(Arc<dyn TriggerCondition>, Vec<Arc<dyn TriggerAction>>)> = self
            .registrations
            .read()
            .expect("trigger table lock poisoned")
            .values()
            .map(|r| (Arc::clone(&r.condition), r.actions.clone()))
            .collect();

        for (condition, actions) in snapshot {
            let token = match panic::catch_unwind(AssertUnwindSafe(|| condition.matches(change))) {
                Ok(Some(token)) => token,
                Ok(None) => continue,
                Err(_) => {
                    error!(root = %change.root, property = %change.property, "trigger condition panicked");
                    continue;
                }
            };

            let label = job_label(&change.property, &token);
            debug!(root = %change.root, job = %label, actions = actions.len(), "trigger matched");
            for action in actions {
                let change = change.clone();
                let token = token.clone();
                self.pool.submit(&label, move || action.run(&change, &token));
            }
        }
    }
}

/// Registry of triggers, subscribed to every document in the indexes it is
/// attached to.
pub struct TriggerRegistrar<D: RootDocument> {
    dispatcher: Arc<Dispatcher>,
    subscriptions: Mutex<HashMap<NodeKey, (Weak<D>, ListenerId)>>,
    attachments: Mutex<Vec<(Weak<ProgramManager<D>>, ListenerId)>>,
}

impl<D: RootDocument> TriggerRegistrar<D> {
    /// Create a registrar whose pool runs at most `max_workers` jobs at once.
    pub fn new(max_workers: usize) -> TriggerResult<Self> {
        Ok(Self {
            dispatcher: Arc::new(Dispatcher {
                registrations: RwLock::new(HashMap::new()),
                pool: WorkerPool::new(max_workers)?,
            }),
            subscriptions: Mutex::new(HashMap::new()),
            attachments: Mutex::new(Vec::new()),
        })
    }

    /// Register an action under a condition.
    pub fn register(&self, condition: Arc<dyn TriggerCondition>, action: Arc<dyn TriggerAction>) {
        let mut table = self
            .dispatcher
            .registrations
            .write()
            .expect("trigger table lock poisoned");
        table
            .entry(identity(&condition))
            .or_insert_with(|| Registration {
                condition,
                actions: Vec::new(),
            })
            .actions
            .push(action);
    }

    /// Remove one registration of `action` under `condition`. Returns `true`
    /// if one was found. The condition is forgotten with its last action.
    ///
    /// Registrations are matched by `Arc` identity, so pass clones of the
    /// `Arc`s given to [`register`](Self::register). An equal value in a
    /// separate allocation matches nothing.
    pub fn unregister(&self, condition: &Arc<dyn TriggerCondition>, action: &Arc<dyn TriggerAction>) -> bool {
        let key = identity(condition);
        let target = identity(action);
        let mut table = self
            .dispatcher
            .registrations
            .write()
            .expect("trigger table lock poisoned");

        let Some(registration) = table.get_mut(&key) else {
            return false;
        };
        let Some(pos) = registration.actions.iter().position(|a| identity(a) == target) else {
            return false;
        };
        registration.actions.remove(pos);
        if registration.actions.is_empty() {
            table.remove(&key);
        }
        true
    }

    /// Number of registered conditions.
    pub fn condition_count(&self) -> usize {
        self.dispatcher
            .registrations
            .read()
            .expect("trigger table lock poisoned")
            .len()
    }

    /// Number of registered (condition, action) pairs.
    pub fn registration_count(&self) -> usize {
        self.dispatcher
            .registrations
            .read()
            .expect("trigger table lock poisoned")
            .values()
            .map(|r| r.actions.len())
            .sum()
    }

    /// Follow an index: subscribe its current documents and those added
    /// later, unsubscribe removed ones.
    pub fn attach(self: &Arc<Self>, index: &Arc<ProgramManager<D>>) {
        let listener = index.add_listener(Arc::clone(self) as Arc<dyn ProgramEventListener<D>>);
        self.attachments
            .lock()
            .expect("attachment lock poisoned")
            .push((Arc::downgrade(index), listener));
        for doc in index.list_all() {
            self.subscribe(&doc);
        }
        debug!(kind = %index.kind(), "trigger registrar attached");
    }

    /// Stop following every index and drop all document subscriptions.
    pub fn detach_all(&self) {
        let attachments = std::mem::take(&mut *self.attachments.lock().expect("attachment lock poisoned"));
        for (index, listener) in attachments {
            if let Some(index) = index.upgrade() {
                index.remove_listener(listener);
            }
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().expect("subscription lock poisoned"));
        for (doc, listener) in subscriptions.into_values() {
            if let Some(doc) = doc.upgrade() {
                doc.remove_change_listener(listener);
            }
        }
    }

    pub fn is_subscribed(&self, key: &NodeKey) -> bool {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .contains_key(key)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().expect("subscription lock poisoned").len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.dispatcher.pool.stats()
    }

    /// Wait for queued trigger jobs. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.pool.wait_idle(timeout)
    }

    /// Detach, then let running jobs finish for up to `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        self.detach_all();
        self.dispatcher.pool.shutdown(timeout);
        info!(stats = ?self.pool_stats(), "trigger registrar shut down");
    }

    fn subscribe(&self, doc: &Arc<D>) {
        let key = doc.node_key();
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock poisoned");
        if subscriptions.contains_key(&key) {
            return;
        }
        let listener = doc.add_change_listener(Arc::clone(&self.dispatcher) as Arc<dyn ChangeListener>);
        subscriptions.insert(key, (Arc::downgrade(doc), listener));
    }

    fn unsubscribe(&self, doc: &Arc<D>) {
        let entry = self
            .subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .remove(&doc.node_key());
        if let Some((subscribed, listener)) = entry {
            // Same key but a different object: remove from the one we hold.
            match subscribed.upgrade() {
                Some(subscribed) => subscribed.remove_change_listener(listener),
                None => doc.remove_change_listener(listener),
            };
        }
    }
}

impl<D: RootDocument> ProgramEventListener<D> for TriggerRegistrar<D> {
    fn program_changed(&self, event: &ProgramEvent<D>) {
        match event {
            ProgramEvent::Added { new } => self.subscribe(new),
            ProgramEvent::Replaced { old, new } => {
                self.unsubscribe(old);
                self.subscribe(new);
            }
            ProgramEvent::Removed { old } => self.unsubscribe(old),
        }
    }
}

impl<D: RootDocument> Drop for TriggerRegistrar<D> {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl<D: RootDocument> std::fmt::Debug for TriggerRegistrar<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistrar")
            .field("registrations", &self.registration_count())
            .field("subscriptions", &self.subscription_count())
            .field("pool", &self.pool_stats())
            .finish()
    }
}
