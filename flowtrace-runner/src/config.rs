use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use flowtrace_workflow::EngineConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "FLOWTRACE_RUNNER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// Directory holding `<workflow-id>.json` files served by the webhook.
    pub workflows_dir: PathBuf,
    /// Run without interception.
    pub disable_instrumentation: bool,
    pub max_concurrency: usize,
    pub retry_base_delay_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/runner").required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrency: self.max_concurrency,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5678,
            workflows_dir: PathBuf::from("workflows"),
            disable_instrumentation: false,
            max_concurrency: 4,
            retry_base_delay_ms: 1000,
        }
    }
}
