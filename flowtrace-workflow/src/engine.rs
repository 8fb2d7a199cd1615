use async_trait::async_trait;
use chrono::Utc;
use flowtrace_core::{
    CoreError, ExecutionContext, ExecutionError, ExecutionId, ExecutionResult, ExecutionStatus,
    Node, Result, TaskContext, TaskRun, TaskRunner, Workflow, WorkflowRunner,
};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on nodes of one execution running at the same time.
    pub max_concurrency: usize,
    /// Delay before the first retry; doubles on every further attempt.
    pub retry_base_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of running one node, including every attempt.
struct NodeOutcome {
    name: String,
    runs: Vec<TaskRun>,
    output: std::result::Result<Vec<Value>, String>,
}

/// Reference engine: executes a workflow DAG wave by wave, dispatching every
/// node through the injected [`TaskRunner`].
///
/// Nodes of one wave are polled concurrently on the caller's task, so any
/// task-local state the caller established stays visible to them.
pub struct DefaultWorkflowEngine {
    tasks: Arc<dyn TaskRunner>,
    config: EngineConfig,
    cancellation_tokens: Arc<Mutex<HashMap<ExecutionId, CancellationToken>>>,
}

type TokenMap = Mutex<HashMap<ExecutionId, CancellationToken>>;

fn lock_tokens(tokens: &TokenMap) -> MutexGuard<'_, HashMap<ExecutionId, CancellationToken>> {
    tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps an execution's token registered until the run finishes or its
/// future is dropped.
struct TokenRegistration<'a> {
    tokens: &'a TokenMap,
    execution_id: ExecutionId,
}

impl<'a> TokenRegistration<'a> {
    fn register(tokens: &'a TokenMap, execution_id: ExecutionId) -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        lock_tokens(tokens).insert(execution_id, token.clone());
        (
            Self {
                tokens,
                execution_id,
            },
            token,
        )
    }
}

impl Drop for TokenRegistration<'_> {
    fn drop(&mut self) {
        lock_tokens(self.tokens).remove(&self.execution_id);
    }
}

impl DefaultWorkflowEngine {
    pub fn new(tasks: Arc<dyn TaskRunner>) -> Self {
        Self::with_config(tasks, EngineConfig::default())
    }

    pub fn with_config(tasks: Arc<dyn TaskRunner>, config: EngineConfig) -> Self {
        Self {
            tasks,
            config,
            cancellation_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Request cooperative cancellation of a running execution.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<()> {
        match lock_tokens(&self.cancellation_tokens).get(&execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id = %execution_id, "Cancelled execution");
                Ok(())
            }
            None => Err(CoreError::NotFound(format!(
                "Execution {} not running",
                execution_id
            ))),
        }
    }

    async fn execute_node(
        &self,
        workflow: &Workflow,
        node: &Node,
        input: Vec<Value>,
        context: &ExecutionContext,
    ) -> NodeOutcome {
        let task_context = TaskContext::new(context.clone(), input);
        let mut runs = Vec::new();
        let mut last_error = String::new();

        for attempt in 0..=node.max_retries {
            let started_at = Utc::now();
            let result = match self
                .tasks
                .run_task(workflow, node, attempt, &task_context)
                .await
            {
                Ok(result) => result,
                Err(e) => flowtrace_core::TaskResult::failure(e.to_string()),
            };
            let finished_at = Utc::now();

            let error = result.error.clone();
            let items = result.items.clone();
            runs.push(TaskRun {
                run_index: attempt,
                started_at,
                finished_at,
                result,
            });

            match error {
                None => {
                    return NodeOutcome {
                        name: node.name.clone(),
                        runs,
                        output: Ok(items),
                    }
                }
                Some(e) => {
                    last_error = e;
                    if attempt < node.max_retries {
                        tracing::warn!(
                            node = %node.name,
                            "Node failed, attempt {}/{}",
                            attempt + 1,
                            node.max_retries + 1
                        );
                        let delay = self.config.retry_base_delay * (1u32 << attempt.min(16));
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        NodeOutcome {
            name: node.name.clone(),
            runs,
            output: Err(last_error),
        }
    }

    fn input_for(
        node: &Node,
        outputs: &HashMap<String, Vec<Value>>,
        context: &ExecutionContext,
    ) -> Vec<Value> {
        if node.depends_on.is_empty() {
            return context.input.clone();
        }
        node.depends_on
            .iter()
            .filter_map(|dep| outputs.get(dep))
            .flat_map(|items| items.iter().cloned())
            .collect()
    }

    async fn execute_waves(
        &self,
        workflow: &Workflow,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let mut outputs: HashMap<String, Vec<Value>> = HashMap::new();
        let mut run_data: HashMap<String, Vec<TaskRun>> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut last_node = None;
        let mut failure: Option<ExecutionError> = None;
        let mut status = ExecutionStatus::Success;

        while completed.len() < workflow.nodes.len() && failure.is_none() {
            let ready: Vec<&Node> = workflow
                .nodes
                .iter()
                .filter(|n| !completed.contains(&n.name))
                .filter(|n| n.depends_on.iter().all(|d| completed.contains(d)))
                .collect();

            if ready.is_empty() {
                return Err(CoreError::InvalidState(
                    "Workflow deadlock: no nodes can be executed".to_string(),
                ));
            }

            let mut pending = Vec::new();
            for node in ready {
                let input = Self::input_for(node, &outputs, context);
                if node.disabled {
                    tracing::debug!(node = %node.name, "Skipping disabled node");
                    outputs.insert(node.name.clone(), input);
                    completed.insert(node.name.clone());
                    continue;
                }
                pending.push((node, input));
            }

            let runs: Vec<_> = pending
                .into_iter()
                .map(|(node, input)| self.execute_node(workflow, node, input, context))
                .collect();
            let wave = stream::iter(runs)
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect::<Vec<_>>();

            let outcomes = tokio::select! {
                _ = cancel.cancelled() => {
                    status = ExecutionStatus::Cancelled;
                    failure = Some(ExecutionError {
                        message: "Execution was cancelled".to_string(),
                        node: None,
                    });
                    break;
                }
                outcomes = wave => outcomes,
            };

            for outcome in outcomes {
                run_data
                    .entry(outcome.name.clone())
                    .or_default()
                    .extend(outcome.runs);
                last_node = Some(outcome.name.clone());
                match outcome.output {
                    Ok(items) => {
                        outputs.insert(outcome.name.clone(), items);
                        completed.insert(outcome.name);
                    }
                    Err(message) => {
                        status = ExecutionStatus::Error;
                        if failure.is_none() {
                            failure = Some(ExecutionError {
                                message,
                                node: Some(outcome.name),
                            });
                        }
                    }
                }
            }
        }

        Ok(ExecutionResult {
            execution_id: context.execution_id,
            workflow_id: workflow.id.clone(),
            status,
            run_data,
            last_node,
            error: failure,
            started_at,
            stopped_at: Utc::now(),
        })
    }
}

#[async_trait]
impl WorkflowRunner for DefaultWorkflowEngine {
    async fn run_workflow(
        &self,
        workflow: &Workflow,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult> {
        workflow.validate()?;

        tracing::info!(
            workflow = %workflow.name,
            execution_id = %context.execution_id,
            "Executing workflow"
        );

        let (registration, cancel) =
            TokenRegistration::register(&self.cancellation_tokens, context.execution_id);
        let result = self.execute_waves(workflow, context, &cancel).await;
        drop(registration);

        match &result {
            Ok(r) if r.is_success() => {
                tracing::info!(workflow = %workflow.name, "Workflow completed")
            }
            Ok(r) => tracing::warn!(
                workflow = %workflow.name,
                status = ?r.status,
                "Workflow finished with errors"
            ),
            Err(e) => tracing::error!(workflow = %workflow.name, error = %e, "Workflow aborted"),
        }

        result
    }
}
