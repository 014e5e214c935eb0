//! Functor execution for the science-program store.
//!
//! A functor is a unit of work run by the store on behalf of a caller. It
//! carries its own failure slot: the executor records errors and panics on
//! the functor instead of returning them, so a functor handed back to its
//! issuer also carries the failure.
//!
//! # Components
//!
//! - [`Functor`] / [`QueryFunctor`] -- the unit-of-work contract
//! - [`Executor`] -- single-node runs and the query loop
//! - [`PriorityLanes`] -- bounded concurrency per [`Priority`]
//! - [`FunctorLogger`] -- start/end logging with deadline warnings
//! - [`FunctorMessage`] / [`FunctorRegistry`] -- functors named by tag and
//!   built locally from a payload
//! - [`ExecConfig`] -- timeouts, thresholds, and lane sizes

pub mod config;
pub mod error;
pub mod executor;
pub mod functor;
pub mod logger;
pub mod message;
pub mod priority;

pub use config::{millis_setting, ExecConfig};
pub use error::{ExecError, ExecResult, FunctorError, Stage};
pub use executor::Executor;
pub use functor::{Functor, Principal, Principals, QueryFunctor};
pub use logger::{FunctorLogger, Handback, RunKind};
pub use message::{FunctorFactory, FunctorMessage, FunctorRegistry, FunctorReply, MessageTarget, RemoteFunctor};
pub use priority::{current_priority, LaneConfig, Priority, PriorityLanes};
