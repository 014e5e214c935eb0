use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::{self, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ExecConfig;
use crate::error::ExecResult;

/// What kind of run is being logged; selects the slow-run threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunKind {
    Functor,
    Query,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Functor => "functor",
            Self::Query => "query",
        })
    }
}

/// Token returned by [`FunctorLogger::log_start`] and handed back to
/// [`FunctorLogger::log_end`].
#[derive(Debug)]
pub struct Handback {
    run: u64,
    name: String,
    kind: RunKind,
    started: Instant,
    deadline: Option<JoinHandle<()>>,
}

impl Handback {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Logs the start and end of functor runs.
///
/// Each run arms a one-shot deadline on a dedicated timer thread. If the run
/// is still going when the deadline passes, a warning names the functor and
/// the thread running it. The run itself is never interrupted.
pub struct FunctorLogger {
    timers: Option<Runtime>,
    timeout: Duration,
    functor_warning: Duration,
    query_warning: Duration,
    next_run: AtomicU64,
    timeouts_fired: Arc<AtomicU64>,
}

impl FunctorLogger {
    pub fn new(config: &ExecConfig) -> ExecResult<Self> {
        let timers = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("spdb-functor-timer")
            .enable_time()
            .build()?;

        Ok(Self {
            timers: Some(timers),
            timeout: config.functor_timeout(),
            functor_warning: config.functor_warning(),
            query_warning: config.query_warning(),
            next_run: AtomicU64::new(1),
            timeouts_fired: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn log_start(&self, name: &str, kind: RunKind) -> Handback {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let current = thread::current();
        let thread_name = current.name().unwrap_or("<unnamed>").to_string();
        debug!(run, functor = name, kind = %kind, thread = %thread_name, "run started");

        let deadline = self.timers.as_ref().map(|timers| {
            let timeout = self.timeout;
            let fired = Arc::clone(&self.timeouts_fired);
            let functor = name.to_string();
            timers.spawn(async move {
                tokio::time::sleep(timeout).await;
                fired.fetch_add(1, Ordering::Relaxed);
                warn!(
                    run,
                    functor = %functor,
                    kind = %kind,
                    thread = %thread_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "run still going past its deadline"
                );
            })
        });

        Handback {
            run,
            name: name.to_string(),
            kind,
            started: Instant::now(),
            deadline,
        }
    }

    /// Disarm the deadline and log the elapsed time. Returns the elapsed time.
    pub fn log_end(&self, handback: Handback) -> Duration {
        if let Some(deadline) = &handback.deadline {
            deadline.abort();
        }
        let elapsed = handback.started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        if self.is_slow(handback.kind, elapsed) {
            warn!(
                run = handback.run,
                functor = %handback.name,
                kind = %handback.kind,
                elapsed_ms,
                threshold_ms = self.warning_for(handback.kind).as_millis() as u64,
                "slow run finished"
            );
        } else {
            info!(run = handback.run, functor = %handback.name, kind = %handback.kind, elapsed_ms, "run finished");
        }
        elapsed
    }

    /// Number of deadline warnings emitted so far.
    pub fn timeouts_fired(&self) -> u64 {
        self.timeouts_fired.load(Ordering::Relaxed)
    }

    /// Whether a run of this kind and duration is logged as slow.
    pub fn is_slow(&self, kind: RunKind, elapsed: Duration) -> bool {
        elapsed >= self.warning_for(kind)
    }

    fn warning_for(&self, kind: RunKind) -> Duration {
        match kind {
            RunKind::Functor => self.functor_warning,
            RunKind::Query => self.query_warning,
        }
    }
}

impl Drop for FunctorLogger {
    fn drop(&mut self) {
        if let Some(timers) = self.timers.take() {
            timers.shutdown_background();
        }
    }
}

impl fmt::Debug for FunctorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctorLogger")
            .field("timeout", &self.timeout)
            .field("functor_warning", &self.functor_warning)
            .field("query_warning", &self.query_warning)
            .field("timeouts_fired", &self.timeouts_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(timeout_ms: u64) -> FunctorLogger {
        FunctorLogger::new(&ExecConfig {
            functor_timeout_ms: timeout_ms,
            functor_warning_ms: 50,
            query_warning_ms: 100,
            ..ExecConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn deadline_fires_for_overrunning_run() {
        let logger = logger(20);
        let hb = logger.log_start("SlowFunctor", RunKind::Functor);

        let deadline = Instant::now() + Duration::from_secs(5);
        while logger.timeouts_fired() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(logger.timeouts_fired(), 1);
        logger.log_end(hb);
    }

    #[test]
    fn finished_run_disarms_deadline() {
        let logger = logger(100);
        let hb = logger.log_start("QuickFunctor", RunKind::Functor);
        let elapsed = logger.log_end(hb);

        assert!(elapsed < Duration::from_millis(100));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(logger.timeouts_fired(), 0);
    }

    #[test]
    fn thresholds_depend_on_run_kind() {
        let logger = logger(60_000);
        let d = Duration::from_millis(75);
        assert!(logger.is_slow(RunKind::Functor, d));
        assert!(!logger.is_slow(RunKind::Query, d));
        assert!(logger.is_slow(RunKind::Query, Duration::from_millis(100)));
    }

    #[test]
    fn handback_carries_name() {
        let logger = logger(60_000);
        let hb = logger.log_start("Named", RunKind::Query);
        assert_eq!(hb.name(), "Named");
        logger.log_end(hb);
    }

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn logged(run: impl FnOnce()) -> String {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(out.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, run);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn run_over_kind_threshold_is_logged_slow() {
        let logger = logger(60_000);

        let text = logged(|| {
            let hb = logger.log_start("Edit", RunKind::Functor);
            thread::sleep(Duration::from_millis(75));
            logger.log_end(hb);
        });
        assert!(text.contains("slow run finished"));
        assert!(text.contains("threshold_ms=50"));

        let text = logged(|| {
            let hb = logger.log_start("Peek", RunKind::Functor);
            logger.log_end(hb);
        });
        assert!(text.contains("run finished"));
        assert!(!text.contains("slow"));
    }
}
