use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use spdb_types::NodeKey;

/// Per-document reader/writer locks.
///
/// Serializing a document holds the read side; an editor that wants to keep
/// serialization out of a multi-step edit takes the write side.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<NodeKey, Arc<RwLock<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a key, created on first use.
    pub fn lock_for(&self, key: &NodeKey) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().expect("key lock table poisoned");
        Arc::clone(locks.entry(*key).or_default())
    }

    /// Drop the lock for a key. Holders of the returned `Arc` keep it alive.
    pub fn forget(&self, key: &NodeKey) {
        self.locks
            .lock()
            .expect("key lock table poisoned")
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().expect("key lock table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_one_lock() {
        let locks = KeyLocks::new();
        let key = NodeKey::new();
        let a = locks.lock_for(&key);
        let b = locks.lock_for(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &locks.lock_for(&NodeKey::new())));
    }

    #[test]
    fn readers_share_writer_excludes() {
        let locks = KeyLocks::new();
        let lock = locks.lock_for(&NodeKey::new());

        let r1 = lock.read().unwrap();
        let r2 = lock.try_read();
        assert!(r2.is_ok());
        assert!(lock.try_write().is_err());
        drop(r2);
        drop(r1);
        assert!(lock.try_write().is_ok());
    }

    #[test]
    fn forget_removes_entry() {
        let locks = KeyLocks::new();
        let key = NodeKey::new();
        locks.lock_for(&key);
        assert_eq!(locks.len(), 1);
        locks.forget(&key);
        assert!(locks.is_empty());
    }
}
