use crate::sink::TraceSink;
use crate::span::{AttributeValue, Attributes, SpanHandle, SpanKind};
use std::sync::Arc;

pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const HTTP_ROUTE: &str = "http.route";

/// Opens spans and reports them to a sink.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn TraceSink> {
        &self.sink
    }

    /// Open a span under `parent`, or a new trace when there is none.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        parent: Option<&SpanHandle>,
        attributes: Attributes,
    ) -> SpanHandle {
        let span = SpanHandle::new(name.into(), kind, parent, attributes, self.sink.clone());
        self.sink.on_start(&span);
        span
    }

    /// Open a generic HTTP server span named after the request method, the
    /// way protocol-level instrumentation names request spans.
    pub fn start_protocol_span(
        &self,
        method: &str,
        route: &str,
        parent: Option<&SpanHandle>,
    ) -> SpanHandle {
        let method = method.to_uppercase();
        let mut attributes = Attributes::new();
        attributes.insert(HTTP_METHOD.to_string(), AttributeValue::from(method.as_str()));
        attributes.insert(HTTP_ROUTE.to_string(), AttributeValue::from(route));
        self.start_span(method, SpanKind::Server, parent, attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_start_span_notifies_sink() {
        let sink = Arc::new(InMemorySink::new());
        let tracer = Tracer::new(sink.clone());
        let root = tracer.start_span("root", SpanKind::Internal, None, Attributes::new());
        let child = tracer.start_span("child", SpanKind::Internal, Some(&root), Attributes::new());

        assert_eq!(sink.started_count(), 2);
        assert_eq!(child.parent_id(), Some(root.id()));
        assert_eq!(child.trace_id(), root.trace_id());
    }

    #[test]
    fn test_protocol_span() {
        let tracer = Tracer::new(Arc::new(InMemorySink::new()));
        let span = tracer.start_protocol_span("post", "/webhook/:workflow", None);
        assert_eq!(span.name(), "POST");
        assert_eq!(span.kind(), SpanKind::Server);
        assert_eq!(span.attribute(HTTP_METHOD), Some(AttributeValue::from("POST")));
        assert_eq!(
            span.attribute(HTTP_ROUTE),
            Some(AttributeValue::from("/webhook/:workflow"))
        );
    }
}
