//! Decorators around the engine's two entry points.
//!
//! Each call goes through the same steps: resolve the parent from the
//! current [`TraceContext`], open a span, run the wrapped call with the new
//! span active, record the outcome, close the span. Every instrumentation
//! step is wrapped in [`guarded`]; if one fails the call proceeds without
//! it. The wrapped call's result is always returned unchanged.

use crate::capture;
use crate::classify::{ClassificationHints, ObservationType};
use crate::context::TraceContext;
use crate::flatten::flatten;
use crate::guard::guarded;
use crate::naming::{TaskNamingContext, WorkflowNamingContext};
use crate::span::{AttributeValue, Attributes, SpanGuard, SpanHandle, SpanKind, SpanStatus};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use flowtrace_core::{
    CoreError, ExecutionContext, ExecutionResult, Node, Result, TaskContext, TaskResult,
    TaskRunner, Workflow, WorkflowRunner,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const WORKFLOW_PREFIX: &str = "flow.workflow";
pub const TASK_PREFIX: &str = "flow.task";

pub const EXECUTION_ID: &str = "flow.execution.id";
pub const EXECUTION_MODE: &str = "flow.execution.mode";
pub const EXECUTION_USER_ID: &str = "flow.execution.user_id";
pub const EXECUTION_SESSION_ID: &str = "flow.execution.session_id";
pub const EXECUTION_STATUS: &str = "flow.execution.status";
pub const EXECUTION_LAST_NODE: &str = "flow.execution.last_node";
pub const WORKFLOW_ID: &str = "flow.workflow.id";
pub const WORKFLOW_NAME: &str = "flow.workflow.name";
pub const WORKFLOW_OUTPUT: &str = "flow.workflow.output";
pub const TASK_RUN_INDEX: &str = "flow.task.run_index";
pub const TASK_OBSERVATION_TYPE: &str = "flow.task.observation_type";
pub const TASK_INPUT: &str = "flow.task.input";
pub const TASK_INPUT_ITEM_COUNT: &str = "flow.task.input_item_count";
pub const TASK_OUTPUT: &str = "flow.task.output";
pub const TASK_OUTPUT_ITEM_COUNT: &str = "flow.task.output_item_count";

#[derive(Serialize)]
struct WorkflowDescriptor<'a> {
    id: &'a str,
    name: &'a str,
    active: bool,
    node_count: usize,
    #[serde(skip_serializing_if = "Map::is_empty")]
    settings: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct TaskDescriptor<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    node_type: &'a str,
    type_version: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    max_retries: usize,
}

fn error_kind(error: &CoreError) -> &'static str {
    match error {
        CoreError::Validation(_) => "ValidationError",
        CoreError::NotFound(_) => "NotFoundError",
        CoreError::InvalidState(_) => "InvalidStateError",
        CoreError::NodeFailed { .. } => "NodeFailedError",
        CoreError::Cancelled(_) => "CancelledError",
        CoreError::Internal(_) => "InternalError",
        CoreError::Serialization(_) => "SerializationError",
    }
}

fn record_error(span: &SpanHandle, kind: &str, message: &str) {
    span.record_exception(kind, message);
    span.set_status(SpanStatus::error(message));
}

// ============================================================================
// Workflow wrapper
// ============================================================================

/// A [`WorkflowRunner`] that opens one span per execution.
pub struct InstrumentedWorkflowRunner<W> {
    inner: W,
    telemetry: Arc<Telemetry>,
}

impl<W> InstrumentedWorkflowRunner<W> {
    pub fn new(inner: W, telemetry: Arc<Telemetry>) -> Self {
        Self { inner, telemetry }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }
}

#[async_trait]
impl<W: WorkflowRunner> WorkflowRunner for InstrumentedWorkflowRunner<W> {
    async fn run_workflow(
        &self,
        workflow: &Workflow,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult> {
        let parent = TraceContext::current();
        let Some(span) = guarded("workflow.open", || {
            open_workflow_span(&self.telemetry, workflow, context, &parent)
        }) else {
            return self.inner.run_workflow(workflow, context).await;
        };

        let guard = SpanGuard::new(span.clone());
        let result = parent
            .with_span(span.clone())
            .scope(self.inner.run_workflow(workflow, context))
            .await;

        guarded("workflow.settle", || {
            settle_workflow_span(&self.telemetry, &span, &result)
        });
        guard.end();
        result
    }
}

fn workflow_attributes(workflow: &Workflow, context: &ExecutionContext) -> Attributes {
    let descriptor = WorkflowDescriptor {
        id: &workflow.id,
        name: &workflow.name,
        active: workflow.active,
        node_count: workflow.nodes.len(),
        settings: &workflow.settings,
    };
    let mut attributes = flatten(&descriptor, WORKFLOW_PREFIX);
    attributes.insert(EXECUTION_ID.into(), context.execution_id.to_string().into());
    attributes.insert(EXECUTION_MODE.into(), context.mode.as_str().into());
    if let Some(user_id) = &context.user_id {
        attributes.insert(EXECUTION_USER_ID.into(), user_id.as_str().into());
    }
    if let Some(session_id) = &context.session_id {
        attributes.insert(EXECUTION_SESSION_ID.into(), session_id.as_str().into());
    }
    attributes
}

fn open_workflow_span(
    telemetry: &Telemetry,
    workflow: &Workflow,
    context: &ExecutionContext,
    parent: &TraceContext,
) -> SpanHandle {
    let execution_id = context.execution_id.to_string();
    let name = telemetry.naming.workflow_span_name(&WorkflowNamingContext {
        workflow_id: &workflow.id,
        workflow_name: &workflow.name,
        execution_id: &execution_id,
        session_id: context.session_id.as_deref(),
    });
    let attributes = workflow_attributes(workflow, context);

    guarded("root_span.rename", || {
        telemetry
            .root_span
            .apply(parent.active_span(), &name, &attributes)
    });

    telemetry
        .tracer
        .start_span(name, SpanKind::Internal, parent.active_span(), attributes)
}

fn settle_workflow_span(telemetry: &Telemetry, span: &SpanHandle, result: &Result<ExecutionResult>) {
    let execution = match result {
        Ok(execution) => execution,
        Err(error) => {
            record_error(span, error_kind(error), &error.to_string());
            return;
        }
    };

    span.set_attribute(EXECUTION_STATUS, execution.status.as_str());
    match &execution.error {
        Some(error) => {
            span.record_exception("ExecutionError", &error.to_string());
            span.set_status(SpanStatus::error(error.message.clone()));
        }
        None => span.set_status(SpanStatus::Ok),
    }

    let Some(last_node) = &execution.last_node else {
        return;
    };
    span.set_attribute(EXECUTION_LAST_NODE, last_node.as_str());

    if telemetry.config.capture_io && execution.error.is_none() {
        let summary = execution
            .runs_of(last_node)
            .last()
            .and_then(|run| capture::extract_output(&run.result, run.run_index));
        if let Some(summary) = summary {
            span.set_attribute(
                WORKFLOW_OUTPUT,
                capture::capture_value(&summary, telemetry.config.max_capture_length),
            );
        }
    }
}

// ============================================================================
// Task wrapper
// ============================================================================

/// A [`TaskRunner`] that opens one child span per task invocation.
pub struct InstrumentedTaskRunner<T> {
    inner: T,
    telemetry: Arc<Telemetry>,
}

impl<T> InstrumentedTaskRunner<T> {
    pub fn new(inner: T, telemetry: Arc<Telemetry>) -> Self {
        Self { inner, telemetry }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: TaskRunner> TaskRunner for InstrumentedTaskRunner<T> {
    async fn run_task(
        &self,
        workflow: &Workflow,
        node: &Node,
        run_index: usize,
        context: &TaskContext,
    ) -> Result<TaskResult> {
        if !self.telemetry.config.scope.includes_tasks() {
            return self.inner.run_task(workflow, node, run_index, context).await;
        }

        let parent = TraceContext::current();
        let Some(span) = guarded("task.open", || {
            open_task_span(&self.telemetry, workflow, node, run_index, context, &parent)
        }) else {
            return self.inner.run_task(workflow, node, run_index, context).await;
        };

        let guard = SpanGuard::new(span.clone());
        let result = parent
            .with_span(span.clone())
            .scope(self.inner.run_task(workflow, node, run_index, context))
            .await;

        guarded("task.settle", || {
            settle_task_span(&self.telemetry, &span, run_index, &result)
        });
        guard.end();
        result
    }
}

fn task_attributes(
    workflow: &Workflow,
    node: &Node,
    run_index: usize,
    context: &TaskContext,
    observation_type: Option<ObservationType>,
) -> Attributes {
    let descriptor = TaskDescriptor {
        name: &node.name,
        node_type: &node.node_type,
        type_version: node.type_version,
        category: node.category.as_deref(),
        max_retries: node.max_retries,
    };
    let mut attributes = flatten(&descriptor, TASK_PREFIX);
    attributes.insert(TASK_RUN_INDEX.into(), run_index.into());
    attributes.insert(
        TASK_OBSERVATION_TYPE.into(),
        observation_type.unwrap_or(ObservationType::Span).as_str().into(),
    );
    attributes.insert(TASK_INPUT_ITEM_COUNT.into(), context.input.len().into());
    attributes.insert(WORKFLOW_ID.into(), workflow.id.as_str().into());
    attributes.insert(WORKFLOW_NAME.into(), workflow.name.as_str().into());
    attributes.insert(
        EXECUTION_ID.into(),
        context.execution.execution_id.to_string().into(),
    );
    attributes
}

fn open_task_span(
    telemetry: &Telemetry,
    workflow: &Workflow,
    node: &Node,
    run_index: usize,
    context: &TaskContext,
    parent: &TraceContext,
) -> SpanHandle {
    let observation_type = if telemetry.config.classify {
        let hints = ClassificationHints {
            category: node.category.clone(),
        };
        guarded("task.classify", || {
            telemetry.classifier.classify(&node.node_type, &hints)
        })
        .flatten()
    } else {
        None
    };

    let name = telemetry.naming.task_span_name(&TaskNamingContext {
        task_name: &node.name,
        observation_type,
    });
    let mut attributes = task_attributes(workflow, node, run_index, context, observation_type);

    if telemetry.config.capture_io {
        if let Some(input) = guarded("task.capture_input", || capture::extract_input(node)).flatten()
        {
            attributes.insert(
                TASK_INPUT.into(),
                AttributeValue::String(capture::capture_value(
                    &input,
                    telemetry.config.max_capture_length,
                )),
            );
        }
    }

    telemetry
        .tracer
        .start_span(name, SpanKind::Internal, parent.active_span(), attributes)
}

fn settle_task_span(
    telemetry: &Telemetry,
    span: &SpanHandle,
    run_index: usize,
    result: &Result<TaskResult>,
) {
    let task = match result {
        Ok(task) => task,
        Err(error) => {
            record_error(span, error_kind(error), &error.to_string());
            return;
        }
    };

    if let Some(message) = &task.error {
        record_error(span, "TaskError", message);
        return;
    }

    span.set_status(SpanStatus::Ok);
    span.set_attribute(TASK_OUTPUT_ITEM_COUNT, task.items.len());
    if telemetry.config.capture_io {
        if let Some(summary) = capture::extract_output(task, run_index) {
            span.set_attribute(
                TASK_OUTPUT,
                capture::capture_value(&summary, telemetry.config.max_capture_length),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtrace_core::ExecutionMode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_workflow_attributes() {
        let workflow = Workflow::new("wf-1", "Orders", vec![Node::new("A", "core.noOp")])
            .with_setting("timezone", json!("UTC"));
        let context = ExecutionContext::new(ExecutionMode::Webhook).with_user("u-7");

        let attrs = workflow_attributes(&workflow, &context);

        assert_eq!(attrs[WORKFLOW_ID], AttributeValue::from("wf-1"));
        assert_eq!(attrs[WORKFLOW_NAME], AttributeValue::from("Orders"));
        assert_eq!(attrs["flow.workflow.node_count"], AttributeValue::I64(1));
        assert_eq!(attrs["flow.workflow.settings.timezone"], AttributeValue::from("UTC"));
        assert_eq!(attrs[EXECUTION_MODE], AttributeValue::from("webhook"));
        assert_eq!(attrs[EXECUTION_USER_ID], AttributeValue::from("u-7"));
        assert!(!attrs.contains_key(EXECUTION_SESSION_ID));
    }

    #[test]
    fn test_task_attributes_default_observation_type() {
        let workflow = Workflow::new("wf-1", "Orders", vec![]);
        let node = Node::new("Fetch", "vendor.spreadsheet");
        let context = TaskContext::new(ExecutionContext::new(ExecutionMode::Manual), vec![json!({})]);

        let attrs = task_attributes(&workflow, &node, 2, &context, None);

        assert_eq!(attrs["flow.task.name"], AttributeValue::from("Fetch"));
        assert_eq!(attrs["flow.task.type"], AttributeValue::from("vendor.spreadsheet"));
        assert_eq!(attrs[TASK_RUN_INDEX], AttributeValue::I64(2));
        assert_eq!(attrs[TASK_OBSERVATION_TYPE], AttributeValue::from("span"));
        assert_eq!(attrs[TASK_INPUT_ITEM_COUNT], AttributeValue::I64(1));
        assert!(!attrs.contains_key("flow.task.category"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(error_kind(&CoreError::Validation("x".into())), "ValidationError");
        assert_eq!(error_kind(&CoreError::node_failed("A", "boom")), "NodeFailedError");
    }
}
