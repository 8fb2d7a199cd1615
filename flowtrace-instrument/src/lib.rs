//! Execution-tracing interception layer for workflow engines.
//!
//! Wraps an engine's two entry points ([`WorkflowRunner`] and [`TaskRunner`])
//! in decorators that open one span per execution and one child span per task
//! invocation, without changing what the engine returns.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowtrace_instrument::{install, InstrumentationConfig, LogSink};
//! use flowtrace_workflow::{DefaultWorkflowEngine, NodeRegistry};
//!
//! let config = InstrumentationConfig::load().unwrap_or_default();
//! if let Some(telemetry) = install(config, Arc::new(LogSink)) {
//!     let tasks = telemetry.instrument_task_runner(NodeRegistry::with_builtin_nodes());
//!     let _runner =
//!         telemetry.instrument_workflow_runner(DefaultWorkflowEngine::new(Arc::new(tasks)));
//! }
//! ```
//!
//! [`WorkflowRunner`]: flowtrace_core::WorkflowRunner
//! [`TaskRunner`]: flowtrace_core::TaskRunner

pub mod capture;
pub mod classify;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod exit;
pub mod flatten;
pub mod guard;
pub mod intercept;
pub mod logging;
pub mod naming;
pub mod root_span;
pub mod sink;
pub mod span;
pub mod telemetry;
pub mod tracer;

pub use classify::{ClassificationHints, Classifier, ObservationType};
pub use config::{ExportConfig, InstrumentScope, InstrumentationConfig};
pub use context::{FutureTraceExt, TraceContext};
pub use error::{TelemetryError, TelemetryResult};
pub use flatten::flatten;
pub use guard::InitGuard;
pub use logging::{init_logging, LogFormat, LogSettings};
pub use intercept::{InstrumentedTaskRunner, InstrumentedWorkflowRunner};
pub use naming::{sanitize_segment, NamingPolicy};
pub use sink::{InMemorySink, LogSink, OtelSink, TraceSink};
pub use span::{
    AttributeValue, Attributes, FinishedSpan, SpanEvent, SpanGuard, SpanHandle, SpanId, SpanKind,
    SpanStatus, TraceId,
};
pub use telemetry::{install, install_from_env, installed, Telemetry};
pub use tracer::Tracer;

/// Prefix every attribute this crate writes is namespaced under.
pub const ATTRIBUTE_PREFIX: &str = "flow";
