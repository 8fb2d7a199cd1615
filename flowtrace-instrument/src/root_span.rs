//! Re-labels generic protocol spans that turn out to be the root of a
//! workflow execution.
//!
//! A webhook request usually arrives as a server span named `POST` or
//! `POST /webhook/:id`. Once the workflow it triggers is known, the parent is
//! renamed to the workflow span name and receives the workflow attributes, so
//! the trace is findable by workflow.

use crate::span::{AttributeValue, Attributes, SpanHandle};
use crate::tracer::{HTTP_METHOD, HTTP_REQUEST_METHOD};
use regex::Regex;
use tracing::{debug, warn};

pub const ORIGINAL_NAME_ATTRIBUTE: &str = "flow.root.original_name";

const HTTP_VERB_PATTERN: &str = r"^(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)(\s+/\S*)?$";

pub struct RootSpanHeuristic {
    verb: Option<Regex>,
}

impl Default for RootSpanHeuristic {
    fn default() -> Self {
        Self::new()
    }
}

impl RootSpanHeuristic {
    pub fn new() -> Self {
        let verb = match Regex::new(HTTP_VERB_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(error = %e, "Invalid HTTP verb pattern; matching on attributes only");
                None
            }
        };
        Self { verb }
    }

    /// Whether `span` looks like a generic protocol span.
    pub fn is_protocol_span(&self, span: &SpanHandle) -> bool {
        if span.has_attribute(HTTP_METHOD) || span.has_attribute(HTTP_REQUEST_METHOD) {
            return true;
        }
        let name = span.name();
        self.verb.as_ref().is_some_and(|re| re.is_match(name.trim()))
    }

    /// Rename `parent` to `workflow_span_name` if it is a protocol span.
    ///
    /// Existing attributes on the parent are never overwritten. Returns
    /// whether the parent was renamed.
    pub fn apply(
        &self,
        parent: Option<&SpanHandle>,
        workflow_span_name: &str,
        attributes: &Attributes,
    ) -> bool {
        let Some(parent) = parent else {
            debug!("No parent span; nothing to rename");
            return false;
        };
        if parent.has_attribute(ORIGINAL_NAME_ATTRIBUTE) || !self.is_protocol_span(parent) {
            return false;
        }

        let original = parent.name();
        parent.merge_attributes(attributes, false);
        parent.set_attribute(ORIGINAL_NAME_ATTRIBUTE, AttributeValue::from(original.as_str()));
        parent.update_name(workflow_span_name);
        debug!(
            original = %original,
            renamed = %workflow_span_name,
            "Renamed protocol root span"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use crate::span::SpanKind;
    use crate::tracer::{Tracer, HTTP_ROUTE};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;

    fn tracer() -> Tracer {
        Tracer::new(Arc::new(InMemorySink::new()))
    }

    fn workflow_attrs() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("flow.workflow.id".into(), "wf-1".into());
        attrs.insert(HTTP_ROUTE.into(), "/should-not-win".into());
        attrs
    }

    #[test]
    fn test_renames_protocol_span() {
        let tracer = tracer();
        let parent = tracer.start_protocol_span("POST", "/webhook/:workflow", None);

        let renamed =
            RootSpanHeuristic::new().apply(Some(&parent), "workflow.execute", &workflow_attrs());

        assert!(renamed);
        assert_eq!(parent.name(), "workflow.execute");
        assert_eq!(parent.attribute(ORIGINAL_NAME_ATTRIBUTE), Some("POST".into()));
        assert_eq!(parent.attribute("flow.workflow.id"), Some("wf-1".into()));
        assert_eq!(parent.attribute(HTTP_ROUTE), Some("/webhook/:workflow".into()));
    }

    #[rstest]
    #[case("POST", true)]
    #[case("GET /webhook/abc", true)]
    #[case("workflow.execute", false)]
    #[case("POSTAL", false)]
    #[case("post", false)]
    fn test_name_matching(#[case] name: &str, #[case] expected: bool) {
        let span = tracer().start_span(name, SpanKind::Server, None, Attributes::new());
        assert_eq!(RootSpanHeuristic::new().is_protocol_span(&span), expected);
    }

    #[test]
    fn test_matches_on_request_method_attribute() {
        let mut attrs = Attributes::new();
        attrs.insert(HTTP_REQUEST_METHOD.into(), "PUT".into());
        let span = tracer().start_span("handler", SpanKind::Server, None, attrs);
        assert!(RootSpanHeuristic::new().is_protocol_span(&span));
    }

    #[test]
    fn test_absent_parent_is_noop() {
        assert!(!RootSpanHeuristic::new().apply(None, "workflow.execute", &Attributes::new()));
    }

    #[test]
    fn test_renames_only_once() {
        let tracer = tracer();
        let parent = tracer.start_protocol_span("POST", "/", None);
        let heuristic = RootSpanHeuristic::new();
        assert!(heuristic.apply(Some(&parent), "first", &Attributes::new()));
        assert!(!heuristic.apply(Some(&parent), "second", &Attributes::new()));
        assert_eq!(parent.name(), "first");
        assert_eq!(parent.attribute(ORIGINAL_NAME_ATTRIBUTE), Some("POST".into()));
    }
}
