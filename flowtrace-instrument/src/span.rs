use crate::sink::TraceSink;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a trace (one per root span).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TraceId(pub Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Unique identifier for a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SpanId(pub Uuid);

impl SpanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// A scalar span attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::I64(v) => write!(f, "{}", v),
            AttributeValue::F64(v) => write!(f, "{}", v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        i64::try_from(value)
            .map(AttributeValue::I64)
            .unwrap_or_else(|_| AttributeValue::String(value.to_string()))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Insertion-ordered attribute set.
pub type Attributes = IndexMap<String, AttributeValue>;

// ============================================================================
// Status, kind, events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error { description: String },
}

impl SpanStatus {
    pub fn error(description: impl Into<String>) -> Self {
        SpanStatus::Error {
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
}

/// A timestamped annotation on a span. Exceptions are recorded as events
/// named `exception`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn exception(kind: &str, message: &str) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert("exception.type".to_string(), kind.into());
        attributes.insert("exception.message".to_string(), message.into());
        Self {
            name: "exception".to_string(),
            timestamp: SystemTime::now(),
            attributes,
        }
    }
}

/// Immutable snapshot of a span, handed to the sink when the span ends.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedSpan {
    pub span_id: SpanId,
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub attributes: Attributes,
    pub status: SpanStatus,
    pub events: Vec<SpanEvent>,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
}

impl FinishedSpan {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn duration_ms(&self) -> u128 {
        self.end_time
            .duration_since(self.start_time)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &SpanEvent> {
        self.events.iter().filter(|e| e.name == "exception")
    }
}

// ============================================================================
// SpanHandle
// ============================================================================

struct SpanState {
    name: String,
    attributes: Attributes,
    status: SpanStatus,
    events: Vec<SpanEvent>,
}

struct SpanInner {
    id: SpanId,
    trace_id: TraceId,
    parent_id: Option<SpanId>,
    kind: SpanKind,
    start_time: SystemTime,
    state: Mutex<SpanState>,
    ended: AtomicBool,
    sink: Arc<dyn TraceSink>,
}

/// A live span. Cheap to clone; all clones refer to the same span.
///
/// Mutations after [`end`](SpanHandle::end) are ignored, and ending twice is a
/// no-op, so exactly one [`FinishedSpan`] reaches the sink per span.
#[derive(Clone)]
pub struct SpanHandle {
    inner: Arc<SpanInner>,
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("id", &self.inner.id)
            .field("trace_id", &self.inner.trace_id)
            .field("parent_id", &self.inner.parent_id)
            .field("name", &self.name())
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl SpanHandle {
    pub(crate) fn new(
        name: String,
        kind: SpanKind,
        parent: Option<&SpanHandle>,
        attributes: Attributes,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                id: SpanId::new(),
                trace_id: parent.map(|p| p.trace_id()).unwrap_or_default(),
                parent_id: parent.map(|p| p.id()),
                kind,
                start_time: SystemTime::now(),
                state: Mutex::new(SpanState {
                    name,
                    attributes,
                    status: SpanStatus::Unset,
                    events: Vec::new(),
                }),
                ended: AtomicBool::new(false),
                sink,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SpanState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on the mutable state unless the span has already ended.
    fn update(&self, f: impl FnOnce(&mut SpanState)) {
        if self.is_ended() {
            tracing::trace!(span_id = %self.inner.id, "Ignoring update to ended span");
            return;
        }
        f(&mut self.state());
    }

    pub fn id(&self) -> SpanId {
        self.inner.id
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.trace_id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.inner.parent_id
    }

    pub fn kind(&self) -> SpanKind {
        self.inner.kind
    }

    pub fn start_time(&self) -> SystemTime {
        self.inner.start_time
    }

    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    pub fn status(&self) -> SpanStatus {
        self.state().status.clone()
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.state().attributes.get(key).cloned()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.state().attributes.contains_key(key)
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    pub fn update_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.update(|state| state.name = name);
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let (key, value) = (key.into(), value.into());
        self.update(|state| {
            state.attributes.insert(key, value);
        });
    }

    /// Copy `attributes` onto the span. Existing keys are kept when
    /// `overwrite` is false.
    pub fn merge_attributes(&self, attributes: &Attributes, overwrite: bool) {
        self.update(|state| {
            for (key, value) in attributes {
                if overwrite || !state.attributes.contains_key(key) {
                    state.attributes.insert(key.clone(), value.clone());
                }
            }
        });
    }

    /// Set the status. An error status is never downgraded to `Ok`.
    pub fn set_status(&self, status: SpanStatus) {
        self.update(|state| {
            if !(state.status.is_error() && status == SpanStatus::Ok) {
                state.status = status;
            }
        });
    }

    pub fn record_exception(&self, kind: &str, message: &str) {
        let event = SpanEvent::exception(kind, message);
        self.update(|state| state.events.push(event));
    }

    /// Like [`record_exception`](Self::record_exception) plus an error status,
    /// but gives up instead of blocking if the span is locked. Used from the
    /// panic hook, which may run while this thread holds the lock.
    pub(crate) fn try_record_failure(&self, kind: &str, message: &str) -> bool {
        if self.is_ended() {
            return false;
        }
        match self.inner.state.try_lock() {
            Ok(mut state) => {
                state.events.push(SpanEvent::exception(kind, message));
                state.status = SpanStatus::error(message);
                true
            }
            Err(_) => false,
        }
    }

    /// End the span and hand its snapshot to the sink. Idempotent.
    pub fn end(&self) {
        if self.inner.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let finished = {
            let state = self.state();
            FinishedSpan {
                span_id: self.inner.id,
                trace_id: self.inner.trace_id,
                parent_span_id: self.inner.parent_id,
                name: state.name.clone(),
                kind: self.inner.kind,
                attributes: state.attributes.clone(),
                status: state.status.clone(),
                events: state.events.clone(),
                start_time: self.inner.start_time,
                end_time: SystemTime::now(),
            }
        };
        self.inner.sink.on_end(finished);
    }
}

// ============================================================================
// SpanGuard
// ============================================================================

/// Ends its span when dropped.
///
/// If the guard is dropped without [`end`](SpanGuard::end) having run (the
/// owning future was dropped, or the thread is unwinding) the span is closed
/// with an error status.
#[must_use = "dropping the guard ends the span immediately"]
pub struct SpanGuard {
    span: SpanHandle,
    finished: bool,
}

impl SpanGuard {
    pub fn new(span: SpanHandle) -> Self {
        Self {
            span,
            finished: false,
        }
    }

    pub fn span(&self) -> &SpanHandle {
        &self.span
    }

    pub fn end(mut self) {
        self.finished = true;
        self.span.end();
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.finished || self.span.is_ended() {
            return;
        }
        if std::thread::panicking() {
            if !self.span.status().is_error() {
                self.span.set_status(SpanStatus::error("panicked"));
            }
        } else {
            self.span.record_exception("Cancelled", "execution dropped before completion");
            self.span.set_status(SpanStatus::error("cancelled"));
        }
        self.span.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use pretty_assertions::assert_eq;

    fn span(sink: &Arc<InMemorySink>, parent: Option<&SpanHandle>) -> SpanHandle {
        SpanHandle::new(
            "test".to_string(),
            SpanKind::Internal,
            parent,
            Attributes::new(),
            sink.clone(),
        )
    }

    #[test]
    fn test_end_is_idempotent() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        span.end();
        span.end();
        assert_eq!(sink.finished().len(), 1);
    }

    #[test]
    fn test_updates_after_end_are_ignored() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        span.end();
        span.set_attribute("late", true);
        span.update_name("renamed");
        assert!(!span.has_attribute("late"));
        assert_eq!(span.name(), "test");
    }

    #[test]
    fn test_child_inherits_trace_id() {
        let sink = Arc::new(InMemorySink::new());
        let parent = span(&sink, None);
        let child = span(&sink, Some(&parent));
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_eq!(child.parent_id(), Some(parent.id()));
        assert_eq!(parent.parent_id(), None);
    }

    #[test]
    fn test_error_status_is_not_downgraded() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        span.set_status(SpanStatus::error("boom"));
        span.set_status(SpanStatus::Ok);
        assert_eq!(span.status(), SpanStatus::error("boom"));
    }

    #[test]
    fn test_merge_attributes_without_overwrite() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        span.set_attribute("a", 1i64);
        let mut incoming = Attributes::new();
        incoming.insert("a".to_string(), 2i64.into());
        incoming.insert("b".to_string(), 3i64.into());
        span.merge_attributes(&incoming, false);
        assert_eq!(span.attribute("a"), Some(AttributeValue::I64(1)));
        assert_eq!(span.attribute("b"), Some(AttributeValue::I64(3)));
    }

    #[test]
    fn test_dropped_guard_marks_cancelled() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        drop(SpanGuard::new(span));
        let finished = sink.finished();
        assert_eq!(finished[0].status, SpanStatus::error("cancelled"));
        assert_eq!(finished[0].exceptions().count(), 1);
    }

    #[test]
    fn test_guard_end_keeps_status() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        let guard = SpanGuard::new(span.clone());
        span.set_status(SpanStatus::Ok);
        guard.end();
        assert_eq!(sink.finished()[0].status, SpanStatus::Ok);
    }

    #[test]
    fn test_guard_closes_span_on_panic() {
        let sink = Arc::new(InMemorySink::new());
        let span = span(&sink, None);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SpanGuard::new(span.clone());
            panic!("task blew up");
        }));
        assert!(result.is_err());
        assert!(span.is_ended());
        assert_eq!(sink.finished()[0].status, SpanStatus::error("panicked"));
    }

    #[test]
    fn test_usize_attribute_conversion() {
        assert_eq!(AttributeValue::from(3usize), AttributeValue::I64(3));
    }
}
