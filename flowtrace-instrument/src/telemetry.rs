//! The installed instrumentation and its process-wide entry points.

use crate::classify::Classifier;
use crate::config::InstrumentationConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::exit;
use crate::guard::{guarded, InitGuard};
use crate::intercept::{InstrumentedTaskRunner, InstrumentedWorkflowRunner};
use crate::naming::NamingPolicy;
use crate::root_span::RootSpanHeuristic;
use crate::sink::{LogSink, OtelSink, TraceSink};
use crate::tracer::Tracer;
use flowtrace_core::{TaskRunner, WorkflowRunner};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info, warn};

static INSTALLED: OnceLock<Arc<Telemetry>> = OnceLock::new();

/// Everything the interception wrappers share: configuration, tracer and
/// the naming and classification policies derived from the configuration.
pub struct Telemetry {
    pub(crate) config: Arc<InstrumentationConfig>,
    pub(crate) tracer: Tracer,
    pub(crate) classifier: Classifier,
    pub(crate) naming: NamingPolicy,
    pub(crate) root_span: RootSpanHeuristic,
}

impl Telemetry {
    pub fn new(config: InstrumentationConfig, sink: Arc<dyn TraceSink>) -> TelemetryResult<Self> {
        config.validate()?;
        Ok(Self {
            naming: NamingPolicy::from_config(&config),
            config: Arc::new(config),
            tracer: Tracer::new(sink),
            classifier: Classifier::new(),
            root_span: RootSpanHeuristic::new(),
        })
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn instrument_workflow_runner<W>(self: &Arc<Self>, inner: W) -> InstrumentedWorkflowRunner<W>
    where
        W: WorkflowRunner,
    {
        InstrumentedWorkflowRunner::new(inner, self.clone())
    }

    pub fn instrument_task_runner<T>(self: &Arc<Self>, inner: T) -> InstrumentedTaskRunner<T>
    where
        T: TaskRunner,
    {
        InstrumentedTaskRunner::new(inner, self.clone())
    }

    /// Export buffered spans, waiting at most the configured flush timeout.
    pub fn flush(&self) -> TelemetryResult<()> {
        self.flush_within(self.config.flush_timeout())
    }

    pub fn flush_within(&self, timeout: Duration) -> TelemetryResult<()> {
        self.tracer.sink().force_flush(timeout)
    }

    /// Flush, then shut the sink down.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        if let Err(e) = self.flush() {
            warn!(error = %e, "Flush before shutdown failed");
        }
        self.tracer.sink().shutdown()?;
        info!("Instrumentation shut down");
        Ok(())
    }
}

/// Install instrumentation for this process.
///
/// Runs at most once per process. Returns the installation only to the call
/// that performed it; later calls log and return `None` (use [`installed`]).
/// Setup failures are logged and leave the process uninstrumented.
pub fn install(config: InstrumentationConfig, sink: Arc<dyn TraceSink>) -> Option<Arc<Telemetry>> {
    install_with(config, |_| sink)
}

/// Load configuration from the environment and install with the sink it
/// selects: OTLP export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, the log
/// otherwise.
pub fn install_from_env() -> Option<Arc<Telemetry>> {
    let config = match InstrumentationConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Invalid instrumentation configuration; using defaults");
            InstrumentationConfig::default()
        }
    };
    install_with(config, sink_for)
}

/// The installation made by [`install`], if any.
pub fn installed() -> Option<Arc<Telemetry>> {
    INSTALLED.get().cloned()
}

fn install_with<F>(config: InstrumentationConfig, make_sink: F) -> Option<Arc<Telemetry>>
where
    F: FnOnce(&InstrumentationConfig) -> Arc<dyn TraceSink>,
{
    let mut installation = None;
    let initialized = InitGuard::global().try_initialize(|| {
        let sink = make_sink(&config);
        let telemetry = Arc::new(Telemetry::new(config, sink)?);
        INSTALLED
            .set(telemetry.clone())
            .map_err(|_| TelemetryError::AlreadyInitialized)?;
        exit::install_panic_hook(telemetry.clone());
        installation = Some(telemetry);
        Ok(())
    });
    if initialized {
        installation
    } else {
        None
    }
}

/// Pick the sink for `config`, falling back to [`LogSink`] when OTLP export
/// is not configured or cannot be built.
pub fn sink_for(config: &InstrumentationConfig) -> Arc<dyn TraceSink> {
    if config.export.endpoint.is_none() {
        info!("No OTLP endpoint configured; writing spans to the log");
        return Arc::new(LogSink);
    }
    match guarded("otlp.setup", || OtelSink::new(config)) {
        Some(Ok(sink)) => Arc::new(sink),
        Some(Err(e)) => {
            error!(error = %e, "Failed to build OTLP exporter; writing spans to the log");
            Arc::new(LogSink)
        }
        None => Arc::new(LogSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = InstrumentationConfig {
            service_name: String::new(),
            ..Default::default()
        };
        assert!(Telemetry::new(config, Arc::new(InMemorySink::new())).is_err());
    }

    #[test]
    fn test_naming_follows_config() {
        let config = InstrumentationConfig {
            raw_task_span_names: true,
            ..Default::default()
        };
        let telemetry = Telemetry::new(config, Arc::new(InMemorySink::new())).unwrap();
        assert!(telemetry.naming.raw_task_span_names);
        assert!(telemetry.config().capture_io);
    }

    #[test]
    fn test_sink_for_without_endpoint_logs() {
        let config = InstrumentationConfig::default();
        let sink = sink_for(&config);
        assert!(sink.force_flush(std::time::Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_shutdown_in_memory() {
        let telemetry =
            Telemetry::new(InstrumentationConfig::default(), Arc::new(InMemorySink::new()))
                .unwrap();
        assert!(telemetry.shutdown().is_ok());
    }
}
