//! Control-flow and data-shaping nodes.

use async_trait::async_trait;
use flowtrace_core::{CoreError, Node, Result, TaskResult};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::NodeHandler;

fn items_or_empty(input: Vec<Value>) -> Vec<Value> {
    if input.is_empty() {
        vec![Value::Object(Map::new())]
    } else {
        input
    }
}

/// `core.set`: merges the `values` object parameter into every item.
pub struct SetNode;

#[async_trait]
impl NodeHandler for SetNode {
    async fn execute(&self, node: &Node, input: Vec<Value>) -> Result<TaskResult> {
        let values = match node.parameters.get("values") {
            Some(Value::Object(values)) => values.clone(),
            Some(_) => {
                return Err(CoreError::Validation(
                    "'values' parameter must be an object".to_string(),
                ))
            }
            None => Map::new(),
        };

        let items = items_or_empty(input)
            .into_iter()
            .map(|item| {
                let mut object = match item {
                    Value::Object(object) => object,
                    other => {
                        let mut wrapped = Map::new();
                        wrapped.insert("value".to_string(), other);
                        wrapped
                    }
                };
                for (key, value) in &values {
                    object.insert(key.clone(), value.clone());
                }
                Value::Object(object)
            })
            .collect();

        Ok(TaskResult::success(items))
    }

    fn node_type(&self) -> &str {
        "core.set"
    }
}

/// `core.if`: keeps the items whose `field` equals `equals`.
pub struct IfNode;

#[async_trait]
impl NodeHandler for IfNode {
    async fn execute(&self, node: &Node, input: Vec<Value>) -> Result<TaskResult> {
        let field = node
            .parameters
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Validation("'field' parameter is required".to_string()))?;
        let expected = node.parameters.get("equals").cloned().unwrap_or(Value::Bool(true));

        let items = input
            .into_iter()
            .filter(|item| item.get(field) == Some(&expected))
            .collect();

        Ok(TaskResult::success(items))
    }

    fn node_type(&self) -> &str {
        "core.if"
    }
}

/// `core.noOp`: passes items through.
pub struct NoOpNode;

#[async_trait]
impl NodeHandler for NoOpNode {
    async fn execute(&self, _node: &Node, input: Vec<Value>) -> Result<TaskResult> {
        Ok(TaskResult::success(input))
    }

    fn node_type(&self) -> &str {
        "core.noOp"
    }
}

/// `core.wait`: sleeps for `amountMs` then passes items through.
pub struct WaitNode;

#[async_trait]
impl NodeHandler for WaitNode {
    async fn execute(&self, node: &Node, input: Vec<Value>) -> Result<TaskResult> {
        let amount = node
            .parameters
            .get("amountMs")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(amount)).await;
        Ok(TaskResult::success(input))
    }

    fn node_type(&self) -> &str {
        "core.wait"
    }
}

/// `core.code`: returns the literal `items` parameter, or echoes its input
/// annotated with the item count.
pub struct CodeNode;

#[async_trait]
impl NodeHandler for CodeNode {
    async fn execute(&self, node: &Node, input: Vec<Value>) -> Result<TaskResult> {
        if let Some(Value::Array(items)) = node.parameters.get("items") {
            return Ok(TaskResult::success(items.clone()));
        }
        let count = input.len();
        Ok(TaskResult::success(vec![json!({
            "count": count,
            "items": input,
        })]))
    }

    fn node_type(&self) -> &str {
        "core.code"
    }
}

/// `core.stopAndError`: fails the node with `errorMessage`.
pub struct StopAndErrorNode;

#[async_trait]
impl NodeHandler for StopAndErrorNode {
    async fn execute(&self, node: &Node, _input: Vec<Value>) -> Result<TaskResult> {
        let message = node
            .parameters
            .get("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or("Workflow stopped");
        Err(CoreError::node_failed(&node.name, message))
    }

    fn node_type(&self) -> &str {
        "core.stopAndError"
    }
}
