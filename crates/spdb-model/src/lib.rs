//! Reference root document for the science-program store.
//!
//! The real science-program model lives outside the store. [`MemDocument`]
//! is a small stand-in that honours the [`spdb_types::RootDocument`]
//! contract: it carries a key, kind, optional program id, named fields and
//! observations, and raises a [`spdb_types::StructuralChange`] for every
//! edit. [`JsonCodec`] persists it as pretty-printed JSON.

pub mod codec;
pub mod document;

pub use codec::JsonCodec;
pub use document::{DocumentRecord, MemDocument, ObservationRecord};
