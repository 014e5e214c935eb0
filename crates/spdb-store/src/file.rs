use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use spdb_types::{DocumentCodec, DocumentKind, NodeKey, RootDocument};

use crate::error::{StoreError, StoreResult};
use crate::locks::KeyLocks;
use crate::traits::Persister;

/// Prefix of in-flight temporary files; reload ignores them.
const TEMP_PREFIX: &str = ".spdb-";

/// One-file-per-document persister over a directory.
///
/// Files are named `<program-id>.<suffix>` when the document has a program
/// id and `<node-key>.<suffix>` otherwise. The persister remembers which
/// file holds each document so that a rename can delete the stale record.
///
/// A removed key stays removed: later stores of it are skipped until
/// [`Persister::restore`] is called for the key.
pub struct FilePersister<D> {
    dir: PathBuf,
    codec: Arc<dyn DocumentCodec<D>>,
    locks: Arc<KeyLocks>,
    files: Mutex<HashMap<NodeKey, PathBuf>>,
    removed: Mutex<HashSet<NodeKey>>,
}

impl<D: RootDocument> FilePersister<D> {
    /// Open a persister over `dir`, creating the directory if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        codec: Arc<dyn DocumentCodec<D>>,
        locks: Arc<KeyLocks>,
    ) -> StoreResult<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(StoreError::NotADirectory(dir));
        }
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            codec,
            locks,
            files: Mutex::new(HashMap::new()),
            removed: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file currently holding a document, if any.
    pub fn path_of(&self, key: &NodeKey) -> Option<PathBuf> {
        self.files
            .lock()
            .expect("file table lock poisoned")
            .get(key)
            .cloned()
    }

    /// Where a document should be written. Falls back to the node key name
    /// when another tracked document already owns the program id name.
    fn target_path(&self, doc: &D) -> PathBuf {
        let key = doc.node_key();
        let suffix = doc.kind().suffix();
        let by_key = self.dir.join(format!("{key}.{suffix}"));

        let Some(id) = doc.program_id() else {
            return by_key;
        };
        let by_id = self.dir.join(format!("{id}.{suffix}"));

        let files = self.files.lock().expect("file table lock poisoned");
        match files.iter().find(|(k, p)| **k != key && **p == by_id) {
            Some((owner, _)) => {
                warn!(
                    key = %key,
                    id = %id,
                    owner = %owner,
                    "record name already taken; storing under node key"
                );
                by_key
            }
            None => by_id,
        }
    }

    fn is_removed(&self, key: &NodeKey) -> bool {
        self.removed
            .lock()
            .expect("removed set lock poisoned")
            .contains(key)
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }

    fn load_file(&self, path: &Path) -> StoreResult<D> {
        let bytes = fs::read(path)?;
        Ok(self.codec.decode(&bytes)?)
    }

    fn record_files(&self, kind: DocumentKind) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(DocumentKind::from_suffix)
                == Some(kind);
            if matches && !hidden {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl<D: RootDocument> Persister<D> for FilePersister<D> {
    fn reload_all(&self, kind: DocumentKind) -> Vec<Arc<D>> {
        let paths = match self.record_files(kind) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot scan storage directory");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            let doc = match self.load_file(&path) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            if doc.kind() != kind {
                warn!(path = %path.display(), kind = %doc.kind(), "skipping record of another kind");
                continue;
            }
            let key = doc.node_key();
            if !seen.insert(key) {
                warn!(path = %path.display(), key = %key, "skipping duplicate record");
                continue;
            }

            self.files
                .lock()
                .expect("file table lock poisoned")
                .insert(key, path);
            docs.push(Arc::new(doc));
        }

        debug!(dir = %self.dir.display(), kind = %kind, count = docs.len(), "reloaded records");
        docs
    }

    fn store(&self, doc: &D) -> StoreResult<()> {
        let key = doc.node_key();
        let lock = self.locks.lock_for(&key);
        let _reading = lock.read().expect("document lock poisoned");
        // Removal takes the write side, so this cannot change until we finish.
        if self.is_removed(&key) {
            debug!(key = %key, "skipping store of removed record");
            return Ok(());
        }

        let bytes = self.codec.encode(doc)?;
        let dest = self.target_path(doc);
        self.write_atomic(&dest, &bytes)?;

        let previous = self
            .files
            .lock()
            .expect("file table lock poisoned")
            .insert(key, dest.clone());
        if let Some(stale) = previous.filter(|p| *p != dest) {
            match fs::remove_file(&stale) {
                Ok(()) => debug!(key = %key, stale = %stale.display(), "removed stale record"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(key = %key, stale = %stale.display(), error = %e, "cannot remove stale record"),
            }
        }

        debug!(key = %key, path = %dest.display(), bytes = bytes.len(), "stored record");
        Ok(())
    }

    fn remove(&self, key: &NodeKey) -> StoreResult<bool> {
        let lock = self.locks.lock_for(key);
        let writing = lock.write().expect("document lock poisoned");

        self.removed
            .lock()
            .expect("removed set lock poisoned")
            .insert(*key);
        let path = self
            .files
            .lock()
            .expect("file table lock poisoned")
            .remove(key);
        let result = match &path {
            Some(path) => match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e.into()),
            },
            None => Ok(false),
        };

        drop(writing);
        self.locks.forget(key);
        if let (Ok(true), Some(path)) = (&result, &path) {
            debug!(key = %key, path = %path.display(), "removed record");
        }
        result
    }

    fn restore(&self, key: &NodeKey) {
        self.removed
            .lock()
            .expect("removed set lock poisoned")
            .remove(key);
    }

    fn size_of(&self, key: &NodeKey) -> Option<u64> {
        let path = self.path_of(key)?;
        fs::metadata(path).ok().map(|m| m.len())
    }

    fn total_storage_bytes(&self) -> u64 {
        let paths: Vec<PathBuf> = self
            .files
            .lock()
            .expect("file table lock poisoned")
            .values()
            .cloned()
            .collect();
        paths
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

impl<D> std::fmt::Debug for FilePersister<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePersister")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
