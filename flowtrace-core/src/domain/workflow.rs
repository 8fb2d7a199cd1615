use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// A workflow definition as the engine sees it: a set of nodes wired
/// together through `depends_on` edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: false,
            settings: Map::new(),
            nodes,
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Checks that node names are unique and every dependency points at an
    /// existing node.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("workflow id cannot be empty".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }

        for node in &self.nodes {
            for dep in &node.depends_on {
                if self.node(dep).is_none() {
                    return Err(CoreError::Validation(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.name, dep
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A single task in a workflow.
///
/// `node_type` is an opaque, namespaced identifier such as `core.if` or
/// `ai.lmChatOpenAi`; `category` is an optional coarse hint supplied by the
/// node's package (e.g. "Core Nodes", "AI", "Trigger").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "default_type_version")]
    pub type_version: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub max_retries: usize,
}

fn default_type_version() -> f64 {
    1.0
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            type_version: default_type_version(),
            category: None,
            parameters: Map::new(),
            depends_on: Vec::new(),
            disabled: false,
            max_retries: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}
