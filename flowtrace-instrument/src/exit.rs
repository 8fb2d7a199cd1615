//! Panic reporting.
//!
//! A panic that escapes business code is recorded on whichever span was
//! active on the panicking task, and the sink is flushed with a bounded wait
//! so already finished spans survive a crashing process. The previously
//! installed hook still runs afterwards.
//!
//! The hook runs before unwinding, so it cannot tell whether the panic will
//! later be caught (by `catch_unwind` or a tokio task boundary). A caught
//! panic therefore still marks the active span as failed. Panics raised
//! under an active span only wait [`IN_TASK_FLUSH_BOUND`] for the flush,
//! since the process usually keeps running after them.

use crate::context::TraceContext;
use crate::guard::{in_instrumentation, panic_message};
use crate::telemetry::Telemetry;
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const IN_TASK_FLUSH_BOUND: Duration = Duration::from_millis(100);

pub fn install_panic_hook(telemetry: Arc<Telemetry>) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if !in_instrumentation() {
            let message = panic_message(info.payload());
            let message = match info.location() {
                Some(location) => {
                    format!("{} at {}:{}", message, location.file(), location.line())
                }
                None => message,
            };
            report_panic(&telemetry, &message);
        }
        previous(info);
    }));
}

fn flush_bound(configured: Duration, in_task: bool) -> Duration {
    if in_task {
        configured.min(IN_TASK_FLUSH_BOUND)
    } else {
        configured
    }
}

fn report_panic(telemetry: &Telemetry, message: &str) {
    let context = TraceContext::current();
    let active = context.active_span();
    if let Some(span) = active {
        if !span.try_record_failure("panic", message) {
            warn!(span_id = %span.id(), "Could not record panic on active span");
        }
    }
    let timeout = flush_bound(telemetry.config().flush_timeout(), active.is_some());
    if let Err(e) = telemetry.flush_within(timeout) {
        warn!(error = %e, "Flush after panic did not complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentationConfig;
    use crate::sink::InMemorySink;
    use crate::span::{Attributes, SpanKind, SpanStatus};

    #[test]
    fn test_report_panic_marks_active_span() {
        let sink = Arc::new(InMemorySink::new());
        let telemetry = Telemetry::new(InstrumentationConfig::default(), sink.clone()).unwrap();
        let span = telemetry
            .tracer()
            .start_span("task.execute", SpanKind::Internal, None, Attributes::new());

        TraceContext::default()
            .with_span(span.clone())
            .sync_scope(|| report_panic(&telemetry, "boom at src/lib.rs:1"));
        span.end();

        let finished = &sink.finished()[0];
        assert_eq!(finished.status, SpanStatus::error("boom at src/lib.rs:1"));
        let exception = finished.exceptions().next().unwrap();
        assert_eq!(
            exception.attributes["exception.type"],
            crate::span::AttributeValue::from("panic")
        );
    }

    #[test]
    fn test_flush_bound_is_short_under_active_span() {
        let configured = Duration::from_secs(2);
        assert_eq!(flush_bound(configured, true), IN_TASK_FLUSH_BOUND);
        assert_eq!(flush_bound(configured, false), configured);
        assert_eq!(
            flush_bound(Duration::from_millis(10), true),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_report_panic_without_active_span() {
        let telemetry =
            Telemetry::new(InstrumentationConfig::default(), Arc::new(InMemorySink::new()))
                .unwrap();
        report_panic(&telemetry, "no span here");
    }
}
