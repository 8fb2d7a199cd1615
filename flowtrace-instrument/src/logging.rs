use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl From<&crate::config::InstrumentationConfig> for LogSettings {
    fn from(config: &crate::config::InstrumentationConfig) -> Self {
        Self {
            level: config.log_level.clone(),
            format: config.log_format,
        }
    }
}

/// Install a global `tracing` subscriber.
///
/// Returns `false` if the host already installed one; that subscriber is
/// left in place.
pub fn init_logging(settings: &LogSettings) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let layer = match settings.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed(),
    };

    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        info!("Logging system initialized with format: {:?}", settings.format);
    }
    installed
}
