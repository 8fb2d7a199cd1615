pub mod ai;
pub mod control;

pub use ai::*;
pub use control::*;

use async_trait::async_trait;
use flowtrace_core::{CoreError, Node, Result, TaskContext, TaskResult, TaskRunner, Workflow};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, node: &Node, input: Vec<Value>) -> Result<TaskResult>;
    fn node_type(&self) -> &str;
}

/// Task runner that dispatches on `Node::node_type`.
#[derive(Default, Clone)]
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every built-in handler.
    pub fn with_builtin_nodes() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SetNode));
        registry.register(Arc::new(IfNode));
        registry.register(Arc::new(NoOpNode));
        registry.register(Arc::new(WaitNode));
        registry.register(Arc::new(CodeNode));
        registry.register(Arc::new(StopAndErrorNode));
        registry.register(Arc::new(MockChatModelNode::default()));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.node_type().to_string(), handler);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }
}

#[async_trait]
impl TaskRunner for NodeRegistry {
    async fn run_task(
        &self,
        _workflow: &Workflow,
        node: &Node,
        run_index: usize,
        context: &TaskContext,
    ) -> Result<TaskResult> {
        let handler = self.handlers.get(&node.node_type).ok_or_else(|| {
            CoreError::NotFound(format!(
                "No handler registered for node type '{}'",
                node.node_type
            ))
        })?;

        tracing::debug!(node = %node.name, run_index, "Running node");
        handler.execute(node, context.input.clone()).await
    }
}
