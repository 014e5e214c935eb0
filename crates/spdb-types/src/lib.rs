//! Foundation types for the science-program object store.
//!
//! Every other `spdb` crate depends on `spdb-types`. The store never looks
//! inside a document; it only sees the narrow [`RootDocument`] contract
//! defined here.
//!
//! # Key Types
//!
//! - [`NodeKey`]: opaque, immutable identity of a node (UUID v7)
//! - [`ProgramId`]: optional human-readable identity of a root document
//! - [`ObservationId`]: `<program-id>-<number>` observation reference
//! - [`DocumentKind`]: program or nightly record, with its file suffix
//! - [`StructuralChange`]: a change event raised by a root document
//! - [`RootDocument`]: the contract the store consumes
//! - [`DocumentCodec`]: byte encoding used by durable persisters

pub mod change;
pub mod document;
pub mod error;
pub mod key;
pub mod kind;

pub use change::{ChangeListener, ChangeListeners, ListenerId, StructuralChange, PROGRAM_ID_PROPERTY};
pub use document::{CodecError, DocumentCodec, RootDocument};
pub use error::TypeError;
pub use key::{NodeKey, ObservationId, ProgramId};
pub use kind::DocumentKind;
