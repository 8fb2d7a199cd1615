//! Assembles the reference engine, with or without interception.

use anyhow::{Context as _, Result};
use flowtrace_core::{Workflow, WorkflowRunner};
use flowtrace_instrument::Telemetry;
use flowtrace_workflow::{DefaultWorkflowEngine, EngineConfig, NodeRegistry};
use std::path::Path;
use std::sync::Arc;

/// Build the workflow runner. With `telemetry`, both the engine and the node
/// registry are wrapped so executions and task invocations produce spans.
pub fn build_runner(
    engine: EngineConfig,
    telemetry: Option<&Arc<Telemetry>>,
) -> Arc<dyn WorkflowRunner> {
    let registry = NodeRegistry::with_builtin_nodes();
    match telemetry {
        Some(telemetry) => {
            let tasks = telemetry.instrument_task_runner(registry);
            let engine = DefaultWorkflowEngine::with_config(Arc::new(tasks), engine);
            Arc::new(telemetry.instrument_workflow_runner(engine))
        }
        None => Arc::new(DefaultWorkflowEngine::with_config(Arc::new(registry), engine)),
    }
}

pub fn load_workflow(path: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
    let workflow: Workflow = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid workflow definition in {}", path.display()))?;
    Ok(workflow)
}
