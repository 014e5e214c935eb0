//! Identity index for the science-program store.
//!
//! Holds the live root documents of one [`DocumentKind`] in two maps that
//! are kept consistent: node key to document, and program id to node key.
//! Every change to membership is reported to [`ProgramEventListener`]s as a
//! [`ProgramEvent`].
//!
//! # Invariants
//!
//! 1. Exactly one document per node key.
//! 2. At most one document per non-null program id. A `put` that would
//!    break this fails with [`IndexError::IdClash`] and changes nothing.
//! 3. Listeners run outside the index lock and a failing listener never
//!    reaches the caller or the other listeners.
//!
//! [`DocumentKind`]: spdb_types::DocumentKind

pub mod error;
pub mod event;
pub mod manager;

pub use error::{IndexError, IndexResult};
pub use event::{ProgramEvent, ProgramEventListener};
pub use manager::ProgramManager;
