use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::runtime::{self, Runtime};
use tracing::{debug, error, warn};

use crate::error::TriggerResult;

/// Job counters for status reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    in_flight: Mutex<usize>,
    idle: Condvar,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Decrements the in-flight count when a job ends, however it ends.
struct InFlight(Arc<Counters>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut n = self.0.in_flight.lock().expect("pool counter lock poisoned");
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Blocking worker pool for trigger actions.
///
/// Jobs run on the blocking threads of a private tokio runtime, which grows
/// on demand up to `max_workers`. Job failures and panics are logged per job
/// and never reach the submitter.
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> TriggerResult<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_workers.max(1))
            .thread_name("spdb-trigger")
            .build()?;
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Queue a job. Jobs submitted after shutdown are dropped with a warning.
    pub fn submit<F>(&self, name: &str, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let runtime = self.runtime.lock().expect("pool runtime lock poisoned");
        let Some(runtime) = runtime.as_ref() else {
            warn!(job = name, "worker pool shut down; dropping job");
            return;
        };

        *self.counters.in_flight.lock().expect("pool counter lock poisoned") += 1;
        let guard = InFlight(Arc::clone(&self.counters));
        let counters = Arc::clone(&self.counters);
        let name = name.to_string();

        runtime.spawn_blocking(move || {
            let _guard = guard;
            match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(())) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(job = %name, "trigger job completed");
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(job = %name, error = %format!("{e:#}"), "trigger job failed");
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(job = %name, "trigger job panicked");
                }
            }
        });
    }

    /// Wait until no job is queued or running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut n = self.counters.in_flight.lock().expect("pool counter lock poisoned");
        while *n > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            n = self
                .counters
                .idle
                .wait_timeout(n, deadline - now)
                .expect("pool counter lock poisoned")
                .0;
        }
        true
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_flight: *self.counters.in_flight.lock().expect("pool counter lock poisoned"),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime.lock().expect("pool runtime lock poisoned").is_none()
    }

    /// Stop accepting jobs and give running ones up to `timeout` to finish.
    pub fn shutdown(&self, timeout: Duration) {
        let runtime = self.runtime.lock().expect("pool runtime lock poisoned").take();
        if let Some(runtime) = runtime {
            let drained = self.wait_idle(timeout);
            if !drained {
                warn!(in_flight = self.stats().in_flight, "trigger jobs still running at shutdown");
            }
            runtime.shutdown_background();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().ok().and_then(Option::take) {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool").field("stats", &self.stats()).finish()
    }
}

/// Short label for a job in logs.
pub(crate) fn job_label(property: &str, token: &Value) -> String {
    match token {
        Value::Null => property.to_string(),
        Value::String(s) => format!("{property}:{s}"),
        other => format!("{property}:{other}"),
    }
}
