//! Destinations for finished spans.

mod otel;

pub use otel::OtelSink;

use crate::error::TelemetryResult;
use crate::span::{FinishedSpan, SpanHandle, SpanId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Receives span lifecycle notifications.
///
/// `on_start` and `on_end` are called synchronously from the instrumented
/// call path and must not block.
pub trait TraceSink: Send + Sync {
    fn on_start(&self, _span: &SpanHandle) {}

    fn on_end(&self, span: FinishedSpan);

    /// Export anything buffered, waiting at most `timeout`.
    fn force_flush(&self, _timeout: Duration) -> TelemetryResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TelemetryResult<()> {
        Ok(())
    }
}

// ============================================================================
// InMemorySink
// ============================================================================

/// Keeps finished spans in memory.
#[derive(Default)]
pub struct InMemorySink {
    started: AtomicUsize,
    finished: Mutex<Vec<FinishedSpan>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn find(&self, name: &str) -> Option<FinishedSpan> {
        self.finished().into_iter().find(|s| s.name == name)
    }

    pub fn children_of(&self, parent: SpanId) -> Vec<FinishedSpan> {
        self.finished()
            .into_iter()
            .filter(|s| s.parent_span_id == Some(parent))
            .collect()
    }

    pub fn clear(&self) {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.started.store(0, Ordering::SeqCst);
    }
}

impl TraceSink for InMemorySink {
    fn on_start(&self, _span: &SpanHandle) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_end(&self, span: FinishedSpan) {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(span);
    }
}

// ============================================================================
// LogSink
// ============================================================================

/// Emits each finished span as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn on_end(&self, span: FinishedSpan) {
        let attributes = serde_json::to_string(&span.attributes).unwrap_or_default();
        let parent = span
            .parent_span_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        info!(
            target: "flowtrace::spans",
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            parent_span_id = %parent,
            name = %span.name,
            status = ?span.status,
            duration_ms = span.duration_ms() as u64,
            attributes = %attributes,
            "Span finished"
        );
    }
}
