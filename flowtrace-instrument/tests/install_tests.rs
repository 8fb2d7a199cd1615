//! Process-wide installation. Each test binary is its own process, so
//! everything that depends on the one-shot install lives in one test.

use flowtrace_instrument::guard::INSTRUMENTED_MARKER;
use flowtrace_instrument::*;
use serial_test::serial;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

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
fn test_install_runs_once_and_reports_panics() {
    let sink = Arc::new(InMemorySink::new());

    let first = install(InstrumentationConfig::default(), sink.clone());

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .finish();
    let second = tracing::subscriber::with_default(subscriber, || {
        install(InstrumentationConfig::default(), Arc::new(InMemorySink::new()))
    });
    let from_env = install_from_env();

    let telemetry = first.expect("first install wins");
    assert!(second.is_none());
    assert!(from_env.is_none());
    let notice = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
    assert!(notice.contains("Instrumentation already initialized"));
    assert!(Arc::ptr_eq(&telemetry, &installed().unwrap()));
    assert!(InitGuard::global().is_claimed());
    assert_eq!(
        std::env::var(INSTRUMENTED_MARKER).unwrap(),
        std::process::id().to_string()
    );

    // The installed hook records the panic on the span active at the time.
    let span = telemetry.tracer().start_span(
        "task.execute",
        SpanKind::Internal,
        None,
        Attributes::new(),
    );
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        TraceContext::default()
            .with_span(span.clone())
            .sync_scope(|| panic!("disk full"))
    }));
    assert!(outcome.is_err());
    span.end();

    let finished = sink.find("task.execute").unwrap();
    match &finished.status {
        SpanStatus::Error { description } => assert!(description.starts_with("disk full at ")),
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(
        finished.exceptions().next().unwrap().attributes["exception.type"],
        AttributeValue::from("panic")
    );
}
