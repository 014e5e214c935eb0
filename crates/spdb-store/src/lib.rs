//! Durable storage for the science-program store.
//!
//! Root documents are kept one file per document in a storage directory,
//! named by program id when the document has one and by node key otherwise,
//! with a suffix per [`DocumentKind`](spdb_types::DocumentKind). Writes go
//! to a temporary file in the same directory and are renamed into place.
//!
//! # Components
//!
//! - [`Persister`] -- load/store/remove contract, with [`FilePersister`]
//!   and the no-op [`TransientPersister`]
//! - [`KeyLocks`] -- per-document reader/writer locks held during
//!   serialization
//! - [`DirtySet`] / [`DirtyMarker`] -- which documents changed since they
//!   were last stored
//! - [`StorageManager`] -- wires an identity index to a persister and runs
//!   the background flush loop

pub mod dirty;
pub mod error;
pub mod file;
pub mod locks;
pub mod manager;
pub mod traits;
pub mod transient;

pub use dirty::{DirtyMarker, DirtySet};
pub use error::{StoreError, StoreResult};
pub use file::FilePersister;
pub use locks::KeyLocks;
pub use manager::{FlushReport, StorageManager};
pub use traits::Persister;
pub use transient::TransientPersister;
