use crate::span::SpanHandle;
use std::future::Future;
use tokio::task::futures::TaskLocalFuture;

tokio::task_local! {
    static ACTIVE_TRACE: TraceContext;
}

/// The trace context of the running task: which span is active.
///
/// Values are immutable; entering a span produces a new context that is only
/// current while the future it scopes is being polled. Concurrently polled
/// executions therefore never observe each other's spans.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    active: Option<SpanHandle>,
}

impl TraceContext {
    /// The context of the current task, or an empty one outside any scope.
    pub fn current() -> Self {
        ACTIVE_TRACE.try_with(Clone::clone).unwrap_or_default()
    }

    /// A child context with `span` active.
    pub fn with_span(&self, span: SpanHandle) -> Self {
        Self { active: Some(span) }
    }

    pub fn active_span(&self) -> Option<&SpanHandle> {
        self.active.as_ref()
    }

    /// Make this context current while `future` runs.
    pub fn scope<F: Future>(self, future: F) -> TaskLocalFuture<TraceContext, F> {
        ACTIVE_TRACE.scope(self, future)
    }

    /// Make this context current while `f` runs.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        ACTIVE_TRACE.sync_scope(self, f)
    }
}

/// Carry a trace context into futures that are spawned or otherwise polled
/// outside the scope they were created in.
pub trait FutureTraceExt: Future + Sized {
    fn with_trace_context(self, context: TraceContext) -> TaskLocalFuture<TraceContext, Self> {
        context.scope(self)
    }

    /// Capture the context current at the call site.
    fn with_current_trace(self) -> TaskLocalFuture<TraceContext, Self> {
        TraceContext::current().scope(self)
    }
}

impl<F: Future> FutureTraceExt for F {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use crate::span::{Attributes, SpanKind};
    use std::sync::Arc;

    fn span(name: &str) -> SpanHandle {
        SpanHandle::new(
            name.to_string(),
            SpanKind::Internal,
            None,
            Attributes::new(),
            Arc::new(InMemorySink::new()),
        )
    }

    #[test]
    fn test_current_outside_scope_is_empty() {
        assert!(TraceContext::current().active_span().is_none());
    }

    #[tokio::test]
    async fn test_scope_sets_active_span() {
        let span = span("outer");
        let id = span.id();
        let seen = TraceContext::default()
            .with_span(span)
            .scope(async { TraceContext::current().active_span().map(|s| s.id()) })
            .await;
        assert_eq!(seen, Some(id));
        assert!(TraceContext::current().active_span().is_none());
    }

    #[tokio::test]
    async fn test_spawned_task_needs_explicit_propagation() {
        let span = span("outer");
        let id = span.id();
        let (lost, kept) = TraceContext::default()
            .with_span(span)
            .scope(async {
                let lost = tokio::spawn(async {
                    TraceContext::current().active_span().map(|s| s.id())
                });
                let kept = tokio::spawn(
                    async { TraceContext::current().active_span().map(|s| s.id()) }
                        .with_current_trace(),
                );
                (lost.await.unwrap(), kept.await.unwrap())
            })
            .await;
        assert_eq!(lost, None);
        assert_eq!(kept, Some(id));
    }

    #[test]
    fn test_sync_scope() {
        let span = span("sync");
        let id = span.id();
        let seen = TraceContext::default()
            .with_span(span)
            .sync_scope(|| TraceContext::current().active_span().map(|s| s.id()));
        assert_eq!(seen, Some(id));
    }
}
