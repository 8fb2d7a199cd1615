use crate::env;
use crate::error::{TelemetryError, TelemetryResult};
use crate::logging::LogFormat;
use crate::naming::{self, DEFAULT_SEGMENT_MAX_LENGTH};
use config::{Config as ConfigLoader, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const ENV_PREFIX: &str = "FLOWTRACE";
pub const OTLP_ENDPOINT_KEY: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Which engine entry points get spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentScope {
    /// Workflow and task spans.
    #[default]
    Full,
    /// Workflow spans only; the task wrapper passes straight through.
    Workflow,
}

impl InstrumentScope {
    pub fn includes_tasks(&self) -> bool {
        matches!(self, InstrumentScope::Full)
    }
}

/// OTLP exporter settings, read from the standard `OTEL_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportConfig {
    /// Unset means spans are written to the log instead.
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub batch_export_timeout: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_millis(env::DEFAULT_OTLP_TIMEOUT),
            batch_export_timeout: Duration::from_millis(env::DEFAULT_BSP_EXPORT_TIMEOUT),
        }
    }
}

impl ExportConfig {
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let millis = |key: &str, default: u64| {
            Duration::from_millis(
                vars.get(key)
                    .and_then(|v| env::parse_timeout_ms(v))
                    .unwrap_or(default),
            )
        };
        Self {
            endpoint: vars
                .get(OTLP_ENDPOINT_KEY)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            timeout: millis(env::OTLP_TIMEOUT_KEY, env::DEFAULT_OTLP_TIMEOUT),
            batch_export_timeout: millis(
                env::BSP_EXPORT_TIMEOUT_KEY,
                env::DEFAULT_BSP_EXPORT_TIMEOUT,
            ),
        }
    }
}

/// Instrumentation settings. Read once at installation and shared
/// immutably afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    pub service_name: String,
    #[serde(rename = "instrument_scope")]
    pub scope: InstrumentScope,
    /// Record task inputs and outputs as span attributes.
    pub capture_io: bool,
    /// Character cap for captured input/output attributes.
    pub max_capture_length: usize,
    pub classify: bool,
    pub classification_in_span_name: bool,
    pub raw_task_span_names: bool,
    pub dynamic_workflow_span_names: bool,
    pub workflow_span_pattern: Option<String>,
    pub segment_max_length: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Upper bound on the flush performed when a panic is reported.
    pub flush_timeout_ms: u64,
    #[serde(skip)]
    pub export: ExportConfig,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            service_name: "flowtrace".to_string(),
            scope: InstrumentScope::Full,
            capture_io: true,
            max_capture_length: 4096,
            classify: true,
            classification_in_span_name: false,
            raw_task_span_names: false,
            dynamic_workflow_span_names: false,
            workflow_span_pattern: None,
            segment_max_length: DEFAULT_SEGMENT_MAX_LENGTH,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            flush_timeout_ms: 2000,
            export: ExportConfig::default(),
        }
    }
}

impl InstrumentationConfig {
    /// Load from `config/flowtrace.*` (optional) and the process environment.
    pub fn load() -> TelemetryResult<Self> {
        Self::build(env::collect_process_env(), Some("config/flowtrace"))
    }

    /// Load from an explicit variable map only.
    pub fn from_vars(vars: HashMap<String, String>) -> TelemetryResult<Self> {
        Self::build(vars, None)
    }

    fn build(mut vars: HashMap<String, String>, file: Option<&str>) -> TelemetryResult<Self> {
        env::normalize(&mut vars);

        let mut builder = ConfigLoader::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let loader = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(Some(vars.clone())),
            )
            .build()?;

        let mut config: Self = loader.try_deserialize()?;
        config.export = ExportConfig::from_vars(&vars);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(TelemetryError::Config(
                "Service name cannot be empty".to_string(),
            ));
        }
        if self.max_capture_length == 0 {
            return Err(TelemetryError::Config(
                "max_capture_length must be greater than zero".to_string(),
            ));
        }
        if self.segment_max_length == 0 {
            return Err(TelemetryError::Config(
                "segment_max_length must be greater than zero".to_string(),
            ));
        }
        if let Some(pattern) = &self.workflow_span_pattern {
            if !pattern.trim().is_empty() && !naming::has_placeholder(pattern) {
                return Err(TelemetryError::Config(format!(
                    "workflow_span_pattern '{}' contains none of {}",
                    pattern,
                    naming::PLACEHOLDERS.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
