//! Trigger dispatch for the science-program store.
//!
//! A trigger is a [`TriggerCondition`] paired with a [`TriggerAction`].
//! Every structural change raised by a tracked root document is offered to
//! each registered condition; each match becomes one job per action
//! registered under that condition, run on the [`WorkerPool`].
//!
//! The [`TriggerRegistrar`] follows the identity index: documents added to
//! the index are subscribed, removed documents unsubscribed.

pub mod error;
pub mod pool;
pub mod registrar;
pub mod trigger;

pub use error::{TriggerError, TriggerResult};
pub use pool::{PoolStats, WorkerPool};
pub use registrar::TriggerRegistrar;
pub use trigger::{TriggerAction, TriggerCondition, TriggerToken};
