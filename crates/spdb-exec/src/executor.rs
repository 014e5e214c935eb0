use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::config::ExecConfig;
use crate::error::{ExecResult, FunctorError, Stage};
use crate::functor::{Functor, Principals, QueryFunctor};
use crate::logger::{FunctorLogger, RunKind};
use crate::priority::PriorityLanes;

/// Runs functors under their priority lane and the run logger.
#[derive(Debug)]
pub struct Executor {
    lanes: Arc<PriorityLanes>,
    logger: Arc<FunctorLogger>,
}

impl Executor {
    pub fn new(config: &ExecConfig) -> ExecResult<Self> {
        Ok(Self {
            lanes: Arc::new(PriorityLanes::new(&config.lanes)),
            logger: Arc::new(FunctorLogger::new(config)?),
        })
    }

    pub fn lanes(&self) -> &PriorityLanes {
        &self.lanes
    }

    pub fn logger(&self) -> &FunctorLogger {
        &self.logger
    }

    /// Run a functor once against `node`.
    pub fn execute<S, N, F>(&self, functor: &mut F, store: &S, node: Option<&N>, principals: &Principals)
    where
        S: ?Sized,
        F: Functor<S, N> + ?Sized,
    {
        self.lanes.with_priority(functor.priority(), || {
            let handback = self.logger.log_start(functor.name(), RunKind::Functor);
            if let Err(e) = guarded(Stage::Execute, || functor.execute(store, node, principals)) {
                record::<S, N, F>(functor, e);
            }
            self.logger.log_end(handback);
        });
    }

    /// Run a query functor over `nodes` in order.
    ///
    /// `is_done` is polled before each node, so a functor that is done after
    /// the n-th node never sees the next one.
    pub fn query<S, N, F, I>(&self, functor: &mut F, store: &S, nodes: I, principals: &Principals)
    where
        S: ?Sized,
        F: QueryFunctor<S, N> + ?Sized,
        I: IntoIterator<Item = N>,
    {
        self.lanes.with_priority(functor.priority(), || {
            let handback = self.logger.log_start(functor.name(), RunKind::Query);
            if let Err(e) = run_query(functor, store, nodes, principals) {
                record::<S, N, F>(functor, e);
            }
            self.logger.log_end(handback);
        });
    }
}

fn run_query<S, N, F, I>(functor: &mut F, store: &S, nodes: I, principals: &Principals) -> Result<(), FunctorError>
where
    S: ?Sized,
    F: QueryFunctor<S, N> + ?Sized,
    I: IntoIterator<Item = N>,
{
    guarded(Stage::Init, || functor.init())?;
    for node in nodes {
        if guarded(Stage::Execute, || Ok(functor.is_done()))? {
            break;
        }
        guarded(Stage::Execute, || functor.execute(store, Some(&node), principals))?;
    }
    guarded(Stage::Finished, || functor.finished())
}

fn record<S, N, F>(functor: &mut F, error: FunctorError)
where
    S: ?Sized,
    F: Functor<S, N> + ?Sized,
{
    warn!(functor = functor.name(), error = %error, "functor failed");
    functor.set_error(error);
}

/// Run one step of a functor, turning errors and panics into a
/// [`FunctorError`].
fn guarded<T>(stage: Stage, step: impl FnOnce() -> anyhow::Result<T>) -> Result<T, FunctorError> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(FunctorError::Failed {
            stage,
            message: format!("{e:#}"),
        }),
        Err(payload) => Err(FunctorError::Panicked {
            stage,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
