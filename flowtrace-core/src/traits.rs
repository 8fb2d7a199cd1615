use async_trait::async_trait;

use crate::domain::{ExecutionContext, ExecutionResult, Node, TaskContext, TaskResult, Workflow};
use crate::error::Result;

/// Workflow-level entry point of an engine.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run_workflow(
        &self,
        workflow: &Workflow,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult>;
}

/// Task-level entry point of an engine. `run_index` counts previous runs of
/// the same node within the execution.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(
        &self,
        workflow: &Workflow,
        node: &Node,
        run_index: usize,
        context: &TaskContext,
    ) -> Result<TaskResult>;
}

#[async_trait]
impl<T: TaskRunner + ?Sized> TaskRunner for std::sync::Arc<T> {
    async fn run_task(
        &self,
        workflow: &Workflow,
        node: &Node,
        run_index: usize,
        context: &TaskContext,
    ) -> Result<TaskResult> {
        (**self).run_task(workflow, node, run_index, context).await
    }
}

#[async_trait]
impl<W: WorkflowRunner + ?Sized> WorkflowRunner for std::sync::Arc<W> {
    async fn run_workflow(
        &self,
        workflow: &Workflow,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult> {
        (**self).run_workflow(workflow, context).await
    }
}
