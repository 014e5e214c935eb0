use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FunctorError;
use crate::priority::Priority;

/// An authenticated identity on whose behalf a functor runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Principals = BTreeSet<Principal>;

/// A unit of work run by the store.
///
/// `S` is the store the functor runs against and `N` the node type it is
/// handed. Failures are not returned to the caller of the run: the executor
/// hands them to [`set_error`](Functor::set_error) and the caller checks
/// [`error`](Functor::error) afterwards.
pub trait Functor<S: ?Sized, N>: Send {
    fn priority(&self) -> Priority {
        Priority::Low
    }

    /// Do the work. `node` is `None` for a run with no target node.
    fn execute(&mut self, store: &S, node: Option<&N>, principals: &Principals) -> anyhow::Result<()>;

    fn set_error(&mut self, error: FunctorError);

    fn error(&self) -> Option<&FunctorError>;

    /// Name used in run logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A functor run once per node of a collection.
///
/// The query loop calls [`init`](QueryFunctor::init), then `execute` for
/// each node while [`is_done`](QueryFunctor::is_done) is false, then
/// [`finished`](QueryFunctor::finished). A failure at any step stops the
/// loop and skips `finished`.
pub trait QueryFunctor<S: ?Sized, N>: Functor<S, N> {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Polled before each node.
    fn is_done(&self) -> bool {
        false
    }

    fn finished(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
