//! Once-per-process installation and panic isolation for instrumentation
//! steps.

use crate::error::TelemetryResult;
use std::any::Any;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Environment variable marking a process as instrumented. Holds the pid of
/// the process that set it.
pub const INSTRUMENTED_MARKER: &str = "FLOWTRACE_INSTRUMENTED";

static GLOBAL: InitGuard = InitGuard::new(INSTRUMENTED_MARKER);

/// Ensures a setup routine runs at most once per process.
///
/// Two markers are checked: the guard's own claim flag, and an environment
/// variable carrying the current pid. The latter is visible to every copy of
/// this crate linked into the process, even though each copy has its own
/// statics. A marker with a different pid was inherited from a parent process
/// and is ignored.
#[derive(Debug)]
pub struct InitGuard {
    claimed: AtomicBool,
    marker_key: &'static str,
}

impl InitGuard {
    pub const fn new(marker_key: &'static str) -> Self {
        Self {
            claimed: AtomicBool::new(false),
            marker_key,
        }
    }

    /// The process-wide guard.
    pub fn global() -> &'static InitGuard {
        &GLOBAL
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub fn marker_key(&self) -> &'static str {
        self.marker_key
    }

    /// Run `setup` if nothing in this process has done so yet.
    ///
    /// Returns `true` only for the first call whose setup succeeded. A setup
    /// that errors or panics is logged and leaves instrumentation disabled;
    /// the guard stays claimed so it is not retried.
    pub fn try_initialize<F>(&self, setup: F) -> bool
    where
        F: FnOnce() -> TelemetryResult<()>,
    {
        let pid = std::process::id();

        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(pid, "Instrumentation already initialized; skipping");
            return false;
        }

        match std::env::var(self.marker_key) {
            Ok(owner) if owner == pid.to_string() => {
                info!(
                    pid,
                    marker = self.marker_key,
                    "Instrumentation already initialized by another copy in this process; skipping"
                );
                return false;
            }
            Ok(owner) => {
                debug!(pid, marker_pid = %owner, "Ignoring stale instrumentation marker");
            }
            Err(_) => {}
        }
        std::env::set_var(self.marker_key, pid.to_string());

        match guarded("init.setup", setup) {
            Some(Ok(())) => {
                info!(pid, "Instrumentation initialized");
                true
            }
            Some(Err(e)) => {
                error!(pid, error = %e, "Instrumentation setup failed; continuing without it");
                false
            }
            None => {
                error!(pid, "Instrumentation setup panicked; continuing without it");
                false
            }
        }
    }
}

// ============================================================================
// Step isolation
// ============================================================================

thread_local! {
    static IN_INSTRUMENTATION: Cell<bool> = const { Cell::new(false) };
}

/// Run one instrumentation step, converting a panic into `None`.
///
/// While `f` runs the thread is flagged so the panic hook does not attribute
/// an instrumentation bug to the business span that happens to be active.
pub fn guarded<T>(step: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    let previous = IN_INSTRUMENTATION.with(|flag| flag.replace(true));
    let result = catch_unwind(AssertUnwindSafe(f));
    IN_INSTRUMENTATION.with(|flag| flag.set(previous));

    match result {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(
                step,
                error = %panic_message(payload.as_ref()),
                "Instrumentation step failed; continuing without it"
            );
            None
        }
    }
}

/// Whether the current thread is inside a [`guarded`] step.
pub fn in_instrumentation() -> bool {
    IN_INSTRUMENTATION.with(Cell::get)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use serial_test::serial;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    #[serial]
    fn test_setup_runs_once() {
        let guard = InitGuard::new("FLOWTRACE_TEST_MARKER_ONCE");
        std::env::remove_var(guard.marker_key());
        let calls = AtomicUsize::new(0);

        let first = guard.try_initialize(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let second = guard.try_initialize(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(first);
        assert!(!second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            std::env::var(guard.marker_key()).unwrap(),
            std::process::id().to_string()
        );
        std::env::remove_var(guard.marker_key());
    }

    #[test]
    #[serial]
    fn test_second_initialize_logs_notice() {
        let guard = InitGuard::new("FLOWTRACE_TEST_MARKER_NOTICE");
        std::env::remove_var(guard.marker_key());
        assert!(guard.try_initialize(|| Ok(())));

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();
        let second = tracing::subscriber::with_default(subscriber, || {
            guard.try_initialize(|| Ok(()))
        });

        assert!(!second);
        assert!(logs.contents().contains("Instrumentation already initialized"));
        std::env::remove_var(guard.marker_key());
    }

    #[test]
    #[serial]
    fn test_marker_from_other_copy_blocks_setup() {
        let marker = "FLOWTRACE_TEST_MARKER_SHARED";
        std::env::remove_var(marker);
        let first_copy = InitGuard::new(marker);
        let second_copy = InitGuard::new(marker);

        assert!(first_copy.try_initialize(|| Ok(())));
        assert!(!second_copy.try_initialize(|| Ok(())));
        std::env::remove_var(marker);
    }

    #[test]
    #[serial]
    fn test_stale_marker_is_ignored() {
        let marker = "FLOWTRACE_TEST_MARKER_STALE";
        std::env::set_var(marker, "999999999");
        let guard = InitGuard::new(marker);

        assert!(guard.try_initialize(|| Ok(())));
        assert_eq!(
            std::env::var(marker).unwrap(),
            std::process::id().to_string()
        );
        std::env::remove_var(marker);
    }

    #[test]
    #[serial]
    fn test_failed_setup_disables_and_stays_claimed() {
        let marker = "FLOWTRACE_TEST_MARKER_FAIL";
        std::env::remove_var(marker);
        let guard = InitGuard::new(marker);

        assert!(!guard.try_initialize(|| Err(TelemetryError::Initialization("boom".into()))));
        assert!(guard.is_claimed());
        assert!(!guard.try_initialize(|| Ok(())));
        std::env::remove_var(marker);
    }

    #[test]
    #[serial]
    fn test_panicking_setup_is_contained() {
        let marker = "FLOWTRACE_TEST_MARKER_PANIC";
        std::env::remove_var(marker);
        let guard = InitGuard::new(marker);

        assert!(!guard.try_initialize(|| panic!("exporter exploded")));
        assert!(guard.is_claimed());
        std::env::remove_var(marker);
    }

    #[test]
    fn test_guarded_returns_value() {
        assert_eq!(guarded("add", || 2 + 2), Some(4));
        assert!(!in_instrumentation());
    }

    #[test]
    fn test_guarded_contains_panic_and_resets_flag() {
        let result: Option<()> = guarded("explode", || {
            assert!(in_instrumentation());
            panic!("bug in instrumentation")
        });
        assert!(result.is_none());
        assert!(!in_instrumentation());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
