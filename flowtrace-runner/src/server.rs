//! Webhook server: `POST /webhook/:workflow` runs `<workflows_dir>/<workflow>.json`.
//!
//! Every request is wrapped in a generic protocol span named after the HTTP
//! verb. When the request turns out to start a workflow, the interception
//! layer renames that span after the workflow.

use crate::engine::load_workflow;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use flowtrace_core::{
    ExecutionContext, ExecutionMode, ExecutionResult, ExecutionStatus, Result as CoreResult,
    WorkflowRunner,
};
use flowtrace_instrument::{SpanGuard, SpanStatus, Telemetry, TraceContext};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const WEBHOOK_ROUTE: &str = "/webhook/:workflow";

const HTTP_STATUS_CODE: &str = "http.response.status_code";

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn WorkflowRunner>,
    pub telemetry: Option<Arc<Telemetry>>,
    pub workflows_dir: PathBuf,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(WEBHOOK_ROUTE, post(run_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub last_node: Option<String>,
    pub output: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExecutionResult> for WebhookResponse {
    fn from(result: ExecutionResult) -> Self {
        let output = result
            .last_output()
            .map(|task| task.items.clone())
            .unwrap_or_default();
        Self {
            execution_id: result.execution_id.to_string(),
            status: result.status,
            last_node: result.last_node,
            output,
            error: result.error.map(|e| e.to_string()),
        }
    }
}

/// Workflow ids map straight to file names, so only a conservative
/// character set is accepted.
fn is_valid_workflow_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn webhook_items(body: Option<Json<Value>>) -> Vec<Value> {
    match body.map(|Json(value)| value) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(item) => vec![item],
    }
}

async fn run_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult<(StatusCode, Json<WebhookResponse>)> {
    if !is_valid_workflow_id(&workflow_id) {
        return Err(ApiError::BadRequest(format!(
            "invalid workflow id '{}'",
            workflow_id
        )));
    }
    let path = state.workflows_dir.join(format!("{}.json", workflow_id));
    if !path.is_file() {
        return Err(ApiError::NotFound(workflow_id));
    }
    let workflow = load_workflow(&path)?;

    let context = ExecutionContext::new(ExecutionMode::Webhook).with_input(webhook_items(body));
    tracing::info!(
        workflow_id = %workflow.id,
        execution_id = %context.execution_id,
        "Webhook execution started"
    );

    let run = state.runner.run_workflow(&workflow, &context);
    let result = match &state.telemetry {
        Some(telemetry) => run_in_protocol_span(telemetry, run).await,
        None => run.await,
    }?;

    let status = match result.status {
        ExecutionStatus::Success => StatusCode::OK,
        ExecutionStatus::Error | ExecutionStatus::Cancelled => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(result.into())))
}

async fn run_in_protocol_span<F>(telemetry: &Telemetry, run: F) -> CoreResult<ExecutionResult>
where
    F: std::future::Future<Output = CoreResult<ExecutionResult>>,
{
    let span = telemetry
        .tracer()
        .start_protocol_span("POST", WEBHOOK_ROUTE, None);
    let guard = SpanGuard::new(span.clone());

    let result = TraceContext::default().with_span(span.clone()).scope(run).await;

    let code: i64 = match &result {
        Ok(execution) if execution.is_success() => 200,
        Ok(_) => 422,
        Err(_) => 500,
    };
    span.set_attribute(HTTP_STATUS_CODE, code);
    span.set_status(if code == 200 {
        SpanStatus::Ok
    } else {
        SpanStatus::error(format!("HTTP {}", code))
    });
    guard.end();
    result
}
