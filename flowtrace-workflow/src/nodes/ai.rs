use async_trait::async_trait;
use flowtrace_core::{Node, Result, TaskResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::NodeHandler;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatModelConfig {
    pub model: String,
    pub max_tokens: usize,
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        Self {
            model: "mock-1".to_string(),
            max_tokens: 256,
        }
    }
}

/// `ai.mockChatModel`: a deterministic stand-in for a chat model provider.
/// Replies with the prompt echoed back, truncated to `max_tokens`
/// whitespace-separated words.
#[derive(Default)]
pub struct MockChatModelNode {
    config: ChatModelConfig,
}

impl MockChatModelNode {
    pub fn new(config: ChatModelConfig) -> Self {
        Self { config }
    }

    fn prompt_for(node: &Node, input: &[Value]) -> String {
        if let Some(prompt) = node.parameters.get("prompt").and_then(Value::as_str) {
            return prompt.to_string();
        }
        input
            .first()
            .and_then(|item| item.get("prompt"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl NodeHandler for MockChatModelNode {
    async fn execute(&self, node: &Node, input: Vec<Value>) -> Result<TaskResult> {
        let prompt = Self::prompt_for(node, &input);
        let model = node
            .parameters
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.model);

        let words: Vec<&str> = prompt.split_whitespace().collect();
        let completion_words = &words[..words.len().min(self.config.max_tokens)];
        let completion = format!("echo: {}", completion_words.join(" "));

        Ok(TaskResult::success(vec![json!({
            "completion": completion,
            "model": model,
            "usage": {
                "prompt_tokens": words.len(),
                "completion_tokens": completion_words.len() + 1,
            }
        })]))
    }

    fn node_type(&self) -> &str {
        "ai.mockChatModel"
    }
}
