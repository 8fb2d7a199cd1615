//! Maps open-ended task type identifiers onto a small fixed taxonomy of
//! observation types.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    Agent,
    Tool,
    Chain,
    Retriever,
    Generation,
    Embedding,
    Evaluator,
    Guardrail,
    Event,
    Span,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Agent => "agent",
            ObservationType::Tool => "tool",
            ObservationType::Chain => "chain",
            ObservationType::Retriever => "retriever",
            ObservationType::Generation => "generation",
            ObservationType::Embedding => "embedding",
            ObservationType::Evaluator => "evaluator",
            ObservationType::Guardrail => "guardrail",
            ObservationType::Event => "event",
            ObservationType::Span => "span",
        }
    }
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" => Ok(ObservationType::Agent),
            "tool" => Ok(ObservationType::Tool),
            "chain" => Ok(ObservationType::Chain),
            "retriever" => Ok(ObservationType::Retriever),
            "generation" => Ok(ObservationType::Generation),
            "embedding" => Ok(ObservationType::Embedding),
            "evaluator" => Ok(ObservationType::Evaluator),
            "guardrail" => Ok(ObservationType::Guardrail),
            "event" => Ok(ObservationType::Event),
            "span" => Ok(ObservationType::Span),
            _ => Err(format!("Unknown observation type: {}", s)),
        }
    }
}

/// Extra facts about a task that help when its type name says nothing.
#[derive(Debug, Clone, Default)]
pub struct ClassificationHints {
    /// Catalog category such as `"Core Nodes"` or `"AI"`.
    pub category: Option<String>,
}

impl ClassificationHints {
    pub fn with_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
        }
    }
}

// ============================================================================
// Lookup tables
// ============================================================================

const EXACT_TYPES: &[(ObservationType, &[&str])] = &[
    (
        ObservationType::Generation,
        &[
            "ai.lmChatOpenAi",
            "ai.lmChatAnthropic",
            "ai.lmChatOllama",
            "ai.lmChatGoogleGemini",
            "ai.lmOpenAi",
            "ai.mockChatModel",
        ],
    ),
    (
        ObservationType::Embedding,
        &["ai.embeddingsOpenAi", "ai.embeddingsCohere", "ai.embeddingsOllama"],
    ),
    (
        ObservationType::Retriever,
        &[
            "ai.retrieverVectorStore",
            "ai.retrieverMultiQuery",
            "ai.vectorStoreInMemory",
            "ai.vectorStorePinecone",
            "ai.vectorStoreQdrant",
        ],
    ),
    (
        ObservationType::Chain,
        &[
            "ai.chainLlm",
            "ai.chainSummarization",
            "ai.chainRetrievalQa",
            "ai.textSplitterRecursiveCharacter",
            "ai.outputParserStructured",
        ],
    ),
    (ObservationType::Agent, &["ai.agent", "ai.openAiAssistant"]),
    (
        ObservationType::Evaluator,
        &[
            "ai.rerankerCohere",
            "ai.sentimentAnalysis",
            "ai.textClassifier",
            "ai.informationExtractor",
        ],
    ),
    (
        ObservationType::Guardrail,
        &["ai.guardrails", "ai.moderation"],
    ),
];

const PATTERNS: &[(ObservationType, &str)] = &[
    (ObservationType::Agent, r"agent"),
    (ObservationType::Embedding, r"embed"),
    (ObservationType::Retriever, r"retriev|vectorstore"),
    (
        ObservationType::Generation,
        r"chat|^lm|llm|^(openai|anthropic|gemini|googlegemini|mistralai|ollama|groq|deepseek)$",
    ),
    (ObservationType::Tool, r"tool"),
    (ObservationType::Chain, r"chain|splitter|parser|memory|workflow"),
    (ObservationType::Evaluator, r"rerank|classif|sentiment|extract|evaluat"),
    (ObservationType::Guardrail, r"perspective|rekognition|moderat|guardrail"),
    (ObservationType::Event, r"trigger|webhook"),
];

/// Lower-cased short names of control-flow tasks in the `core` category.
const CONTROL_FLOW: &[&str] = &[
    "if",
    "switch",
    "merge",
    "filter",
    "set",
    "renamekeys",
    "wait",
    "code",
    "function",
    "noop",
    "executeworkflow",
    "splitinbatches",
    "stopanderror",
];

const SCHEDULE_NAMES: &[&str] = &["schedule", "cron", "interval"];

// ============================================================================
// Classifier
// ============================================================================

/// Three-tier classifier: exact type names, then name heuristics, then the
/// task's catalog category. The first tier with an answer wins.
pub struct Classifier {
    exact: Vec<(ObservationType, HashSet<&'static str>)>,
    patterns: Vec<(ObservationType, Regex)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        let exact = EXACT_TYPES
            .iter()
            .map(|(kind, names)| (*kind, names.iter().copied().collect()))
            .collect();

        let mut patterns = Vec::with_capacity(PATTERNS.len());
        for (kind, pattern) in PATTERNS {
            match Regex::new(pattern) {
                Ok(regex) => patterns.push((*kind, regex)),
                Err(e) => warn!(pattern = %pattern, error = %e, "Skipping invalid classifier pattern"),
            }
        }

        Self { exact, patterns }
    }

    pub fn classify(&self, task_type: &str, hints: &ClassificationHints) -> Option<ObservationType> {
        let category = hints.category.as_deref().map(normalize_category);
        if task_type.is_empty() && category.is_none() {
            return None;
        }

        if let Some((kind, _)) = self.exact.iter().find(|(_, names)| names.contains(task_type)) {
            return Some(*kind);
        }

        let short = short_name(task_type).to_lowercase();
        if !short.is_empty() {
            if let Some((kind, _)) = self.patterns.iter().find(|(_, re)| re.is_match(&short)) {
                return Some(*kind);
            }
        }

        match category?.as_str() {
            "trigger" => Some(ObservationType::Event),
            "transform" | "ai" => Some(ObservationType::Chain),
            "core" if CONTROL_FLOW.contains(&short.as_str()) => Some(ObservationType::Chain),
            "core" if SCHEDULE_NAMES.iter().any(|n| short.contains(n)) => {
                Some(ObservationType::Event)
            }
            "core" => Some(ObservationType::Tool),
            _ => None,
        }
    }
}

/// The segment after the last `.`, so package namespaces do not take part in
/// heuristic matching.
pub fn short_name(task_type: &str) -> &str {
    task_type.rsplit('.').next().unwrap_or(task_type)
}

/// `"Core Nodes"` → `"core"`.
pub fn normalize_category(category: &str) -> String {
    let lower = category.trim().to_lowercase();
    lower
        .strip_suffix(" nodes")
        .map(str::trim_end)
        .unwrap_or(lower.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn classify(task_type: &str, category: Option<&str>) -> Option<ObservationType> {
        let hints = ClassificationHints {
            category: category.map(String::from),
        };
        Classifier::new().classify(task_type, &hints)
    }

    #[rstest]
    #[case("LmChatOpenAi", None, Some(ObservationType::Generation))]
    #[case("RetrieverVectorStore", None, Some(ObservationType::Retriever))]
    #[case("UnknownWidget123", Some("Core Nodes"), Some(ObservationType::Tool))]
    #[case("Schedule", Some("Core Nodes"), Some(ObservationType::Event))]
    #[case("", None, None)]
    fn test_reference_examples(
        #[case] task_type: &str,
        #[case] category: Option<&str>,
        #[case] expected: Option<ObservationType>,
    ) {
        assert_eq!(classify(task_type, category), expected);
    }

    #[rstest]
    #[case("ai.agent", ObservationType::Agent)]
    #[case("ai.embeddingsCohere", ObservationType::Embedding)]
    #[case("ai.rerankerCohere", ObservationType::Evaluator)]
    #[case("ai.moderation", ObservationType::Guardrail)]
    #[case("ai.chainLlm", ObservationType::Chain)]
    fn test_exact_tier(#[case] task_type: &str, #[case] expected: ObservationType) {
        assert_eq!(classify(task_type, None), Some(expected));
    }

    #[rstest]
    #[case("vendor.githubTrigger", ObservationType::Event)]
    #[case("core.webhook", ObservationType::Event)]
    #[case("vendor.toolWikipedia", ObservationType::Tool)]
    #[case("vendor.memoryBufferWindow", ObservationType::Chain)]
    #[case("vendor.documentExtractor", ObservationType::Evaluator)]
    #[case("vendor.perspectiveApi", ObservationType::Guardrail)]
    #[case("vendor.llmRouter", ObservationType::Generation)]
    #[case("core.executeWorkflow", ObservationType::Chain)]
    #[case("vendor.agentTrigger", ObservationType::Agent)]
    #[case("vendor.toolWebhook", ObservationType::Tool)]
    fn test_heuristic_tier(#[case] task_type: &str, #[case] expected: ObservationType) {
        assert_eq!(classify(task_type, None), Some(expected));
    }

    #[test]
    fn test_namespace_does_not_trigger_heuristics() {
        assert_eq!(classify("ai-langchain.calculator", None), None);
        assert_eq!(
            classify("ai-langchain.calculator", Some("AI")),
            Some(ObservationType::Chain)
        );
    }

    #[rstest]
    #[case("core.if", "Core Nodes", ObservationType::Chain)]
    #[case("core.renameKeys", "Core Nodes", ObservationType::Chain)]
    #[case("core.cron", "Core Nodes", ObservationType::Event)]
    #[case("core.httpRequest", "Core Nodes", ObservationType::Tool)]
    #[case("vendor.rssFeed", "Trigger Nodes", ObservationType::Event)]
    #[case("vendor.dateTime", "Transform", ObservationType::Chain)]
    fn test_category_tier(
        #[case] task_type: &str,
        #[case] category: &str,
        #[case] expected: ObservationType,
    ) {
        assert_eq!(classify(task_type, Some(category)), Some(expected));
    }

    #[test]
    fn test_unknown_category_is_unclassified() {
        assert_eq!(classify("vendor.spreadsheet", Some("Productivity")), None);
        assert_eq!(classify("vendor.spreadsheet", None), None);
    }

    #[test]
    fn test_normalize_category() {
        assert_eq!(normalize_category("Core Nodes"), "core");
        assert_eq!(normalize_category(" AI "), "ai");
        assert_eq!(normalize_category("Transform"), "transform");
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("ai.lmChatOpenAi"), "lmChatOpenAi");
        assert_eq!(short_name("plain"), "plain");
        assert_eq!(short_name(""), "");
    }

    #[test]
    fn test_observation_type_round_trip_names() {
        for kind in [ObservationType::Agent, ObservationType::Span, ObservationType::Guardrail] {
            assert_eq!(kind.as_str().parse::<ObservationType>().unwrap(), kind);
        }
        assert!("unknown".parse::<ObservationType>().is_err());
    }
}
