//! Span naming. Names stay low-cardinality unless the operator opts into
//! dynamic names or a pattern.

use crate::classify::ObservationType;
use crate::config::InstrumentationConfig;

pub const DEFAULT_WORKFLOW_SPAN_NAME: &str = "workflow.execute";
pub const DEFAULT_TASK_SPAN_NAME: &str = "task.execute";
pub const DEFAULT_SEGMENT_MAX_LENGTH: usize = 64;

/// Placeholders understood in a workflow span pattern.
pub const PLACEHOLDERS: [&str; 4] = ["{workflowId}", "{workflowName}", "{executionId}", "{sessionId}"];

const UNKNOWN_SEGMENT: &str = "unknown";

#[derive(Debug, Clone, Copy)]
pub struct WorkflowNamingContext<'a> {
    pub workflow_id: &'a str,
    pub workflow_name: &'a str,
    pub execution_id: &'a str,
    pub session_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskNamingContext<'a> {
    pub task_name: &'a str,
    pub observation_type: Option<ObservationType>,
}

#[derive(Debug, Clone)]
pub struct NamingPolicy {
    pub workflow_span_pattern: Option<String>,
    pub dynamic_workflow_span_names: bool,
    pub raw_task_span_names: bool,
    pub classification_in_span_name: bool,
    pub segment_max_length: usize,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            workflow_span_pattern: None,
            dynamic_workflow_span_names: false,
            raw_task_span_names: false,
            classification_in_span_name: false,
            segment_max_length: DEFAULT_SEGMENT_MAX_LENGTH,
        }
    }
}

impl NamingPolicy {
    pub fn from_config(config: &InstrumentationConfig) -> Self {
        Self {
            workflow_span_pattern: config
                .workflow_span_pattern
                .clone()
                .filter(|p| !p.trim().is_empty()),
            dynamic_workflow_span_names: config.dynamic_workflow_span_names,
            raw_task_span_names: config.raw_task_span_names,
            classification_in_span_name: config.classification_in_span_name,
            segment_max_length: config.segment_max_length,
        }
    }

    pub fn workflow_span_name(&self, ctx: &WorkflowNamingContext<'_>) -> String {
        let segment = |value: &str| sanitize_segment(value, self.segment_max_length);

        if let Some(pattern) = &self.workflow_span_pattern {
            return pattern
                .replace("{workflowId}", &segment(ctx.workflow_id))
                .replace("{workflowName}", &segment(ctx.workflow_name))
                .replace("{executionId}", &segment(ctx.execution_id))
                .replace("{sessionId}", &segment(ctx.session_id.unwrap_or_default()));
        }

        if self.dynamic_workflow_span_names {
            return format!(
                "workflow.{}.{}.{}",
                segment(ctx.workflow_id),
                segment(ctx.workflow_name),
                segment(ctx.execution_id)
            );
        }

        DEFAULT_WORKFLOW_SPAN_NAME.to_string()
    }

    pub fn task_span_name(&self, ctx: &TaskNamingContext<'_>) -> String {
        if self.raw_task_span_names && !ctx.task_name.trim().is_empty() {
            return ctx.task_name.to_string();
        }
        match ctx.observation_type {
            Some(kind) if self.classification_in_span_name => format!("task.{}", kind),
            _ => DEFAULT_TASK_SPAN_NAME.to_string(),
        }
    }
}

/// Make `value` safe for use inside a span name.
///
/// Runs of characters outside `[A-Za-z0-9._-]` (whitespace included) become a
/// single `-`; leading and trailing dashes are dropped and the result is cut
/// to `max_len` characters. An empty result becomes `unknown`.
pub fn sanitize_segment(value: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }

    let capped: String = out.trim_matches('-').chars().take(max_len).collect();
    let capped = capped.trim_end_matches('-');
    if capped.is_empty() {
        UNKNOWN_SEGMENT.to_string()
    } else {
        capped.to_string()
    }
}

/// Whether `pattern` contains at least one known placeholder.
pub fn has_placeholder(pattern: &str) -> bool {
    PLACEHOLDERS.iter().any(|p| pattern.contains(p))
}
