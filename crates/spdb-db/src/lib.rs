//! Embedded science-program database.
//!
//! [`LocalDatabase`] puts the pieces of the store behind one facade: two
//! identity indexes (programs and nightly records), their storage managers
//! over a shared persister, the functor executor, and the trigger
//! registrar.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spdb_db::{DatabaseConfig, LocalDatabase};
//! use spdb_model::{JsonCodec, MemDocument};
//! use spdb_types::ProgramId;
//!
//! let db = LocalDatabase::<MemDocument>::create("/var/spdb", Arc::new(JsonCodec), DatabaseConfig::from_env())?;
//! let program = MemDocument::program(Some(ProgramId::new("GS-2024A-Q-1")?));
//! db.put(program.clone())?;
//! db.checkpoint(&program)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod admin;
pub mod config;
pub mod database;
pub mod error;
pub mod functors;
pub mod manager;
pub mod node;
pub mod query;
pub mod uuid_file;

pub use admin::{DbAdmin, DbStatus, MemoryStatus};
pub use config::DatabaseConfig;
pub use database::LocalDatabase;
pub use error::{DbError, DbResult};
pub use functors::{ListIds, LIST_IDS_TAG};
pub use manager::DatabaseManager;
pub use node::{Node, ObservationNode};
pub use query::QueryRunner;
