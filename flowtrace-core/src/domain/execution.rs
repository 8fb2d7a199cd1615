use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::ids::ExecutionId;

// ===== Execution Context =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Manual,
    Cli,
    Webhook,
    Trigger,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Manual => "manual",
            ExecutionMode::Cli => "cli",
            ExecutionMode::Webhook => "webhook",
            ExecutionMode::Trigger => "trigger",
        }
    }
}

/// Per-execution data the engine hands to both entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub mode: ExecutionMode,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Items fed to nodes without dependencies.
    #[serde(default)]
    pub input: Vec<Value>,
}

impl ExecutionContext {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            mode,
            user_id: None,
            session_id: None,
            input: Vec::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_input(mut self, input: Vec<Value>) -> Self {
        self.input = input;
        self
    }
}

/// The additional context handed to a task invocation: the execution it
/// belongs to plus the items flowing into the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub execution: ExecutionContext,
    pub input: Vec<Value>,
}

impl TaskContext {
    pub fn new(execution: ExecutionContext, input: Vec<Value>) -> Self {
        Self { execution, input }
    }
}

// ===== Task Results =====

/// Output of one task invocation. `error` carries a domain-level failure the
/// node reported without the call itself failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub items: Vec<Value>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(items: Vec<Value>) -> Self {
        Self { items, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRun {
    pub run_index: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: TaskResult,
}

// ===== Execution Results =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionError {
    pub message: String,
    pub node: Option<String>,
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{} (node '{}')", self.message, node),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ExecutionError {}

/// What the engine returns once an execution settles. Node failures are
/// reported here through `error` rather than as an `Err` from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub run_data: HashMap<String, Vec<TaskRun>>,
    pub last_node: Option<String>,
    pub error: Option<ExecutionError>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success && self.error.is_none()
    }

    /// Result of the most recent run of the last node that executed.
    pub fn last_output(&self) -> Option<&TaskResult> {
        let node = self.last_node.as_ref()?;
        self.run_data.get(node)?.last().map(|run| &run.result)
    }

    pub fn runs_of(&self, node: &str) -> &[TaskRun] {
        self.run_data.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}
