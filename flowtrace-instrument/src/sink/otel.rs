//! Bridge from [`SpanHandle`]s to the OpenTelemetry SDK with an OTLP exporter.

use super::TraceSink;
use crate::config::{ExportConfig, InstrumentationConfig};
use crate::error::{TelemetryError, TelemetryResult};
use crate::span::{AttributeValue, FinishedSpan, SpanHandle, SpanId, SpanKind, SpanStatus};
use opentelemetry::trace::{
    SpanKind as OtelSpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _,
};
use opentelemetry::{global, Context, KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Config, Tracer, TracerProvider,
};
use opentelemetry_sdk::{runtime, Resource};
use std::collections::HashMap;
use std::sync::{mpsc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE_NAME: &str = "service.name";
const SERVICE_VERSION: &str = "service.version";

/// Sink that mirrors every span into an OpenTelemetry SDK span.
///
/// The SDK span is started in [`on_start`](TraceSink::on_start) under the
/// parent's OpenTelemetry context, so exported parent/child links match ours.
/// Name, attributes, status and events are applied when the span ends, since
/// the root-span heuristic may still rename a span while it is open.
pub struct OtelSink {
    tracer: Tracer,
    provider: TracerProvider,
    active: Mutex<HashMap<SpanId, Context>>,
}

impl OtelSink {
    /// Build an OTLP/gRPC pipeline from `config.export`.
    ///
    /// Must be called inside a tokio runtime; the batch processor runs on it.
    pub fn new(config: &InstrumentationConfig) -> TelemetryResult<Self> {
        let export = &config.export;
        let endpoint = export.endpoint.as_deref().ok_or_else(|| {
            TelemetryError::Config("OTEL_EXPORTER_OTLP_ENDPOINT is not set".to_string())
        })?;

        let provider = build_provider(&config.service_name, endpoint, export)?;
        global::set_tracer_provider(provider.clone());

        info!(
            service_name = %config.service_name,
            otlp_endpoint = %endpoint,
            timeout_ms = export.timeout.as_millis() as u64,
            batch_export_timeout_ms = export.batch_export_timeout.as_millis() as u64,
            "OTLP span export initialized"
        );

        Ok(Self::from_provider(provider, config.service_name.clone()))
    }

    /// Wrap an already configured provider.
    pub fn from_provider(provider: TracerProvider, tracer_name: String) -> Self {
        Self {
            tracer: provider.tracer(tracer_name),
            provider,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<SpanId, Context>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_provider(
    service_name: &str,
    endpoint: &str,
    export: &ExportConfig,
) -> TelemetryResult<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(export.timeout)
        .build()
        .map_err(|e| TelemetryError::Initialization(e.to_string()))?;

    let batch_config = BatchConfigBuilder::default()
        .with_max_export_timeout(export.batch_export_timeout)
        .build();
    let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio)
        .with_batch_config(batch_config)
        .build();

    let resource = Resource::new(vec![
        KeyValue::new(SERVICE_NAME, service_name.to_string()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ]);

    Ok(TracerProvider::builder()
        .with_span_processor(processor)
        .with_config(Config::default().with_resource(resource))
        .build())
}

fn to_otel_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => Value::from(s.clone()),
        AttributeValue::I64(v) => Value::from(*v),
        AttributeValue::F64(v) => Value::from(*v),
        AttributeValue::Bool(v) => Value::from(*v),
    }
}

fn to_otel_kind(kind: SpanKind) -> OtelSpanKind {
    match kind {
        SpanKind::Internal => OtelSpanKind::Internal,
        SpanKind::Server => OtelSpanKind::Server,
    }
}

impl TraceSink for OtelSink {
    fn on_start(&self, span: &SpanHandle) {
        let mut active = self.active();
        let parent_cx = span
            .parent_id()
            .and_then(|parent| active.get(&parent).cloned())
            .unwrap_or_default();

        let otel_span = self
            .tracer
            .span_builder(span.name())
            .with_kind(to_otel_kind(span.kind()))
            .with_start_time(span.start_time())
            .start_with_context(&self.tracer, &parent_cx);

        active.insert(span.id(), parent_cx.with_span(otel_span));
    }

    fn on_end(&self, span: FinishedSpan) {
        let Some(cx) = self.active().remove(&span.span_id) else {
            debug!(span_id = %span.span_id, "No OpenTelemetry span for finished span");
            return;
        };
        let otel_span = cx.span();

        otel_span.update_name(span.name);
        otel_span.set_attributes(
            span.attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key.clone(), to_otel_value(value))),
        );
        for event in span.events {
            let attributes = event
                .attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key.clone(), to_otel_value(value)))
                .collect();
            otel_span.add_event_with_timestamp(event.name, event.timestamp, attributes);
        }
        match span.status {
            SpanStatus::Unset => {}
            SpanStatus::Ok => otel_span.set_status(Status::Ok),
            SpanStatus::Error { description } => otel_span.set_status(Status::error(description)),
        }
        otel_span.end_with_timestamp(span.end_time);
    }

    /// Runs the SDK flush on a helper thread so a stuck exporter cannot hold
    /// the caller past `timeout`.
    fn force_flush(&self, timeout: Duration) -> TelemetryResult<()> {
        let provider = self.provider.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("flowtrace-flush".to_string())
            .spawn(move || {
                let failures: Vec<String> = provider
                    .force_flush()
                    .into_iter()
                    .filter_map(Result::err)
                    .map(|e| e.to_string())
                    .collect();
                let _ = tx.send(failures);
            })
            .map_err(|e| TelemetryError::Export(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(failures) if failures.is_empty() => Ok(()),
            Ok(failures) => Err(TelemetryError::Export(failures.join("; "))),
            Err(_) => Err(TelemetryError::Export(format!(
                "flush did not complete within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn shutdown(&self) -> TelemetryResult<()> {
        let open = self.active().len();
        if open > 0 {
            debug!(open_spans = open, "Shutting down with spans still open");
        }
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::Export(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_requires_endpoint() {
        let config = InstrumentationConfig::default();
        assert!(matches!(
            OtelSink::new(&config),
            Err(TelemetryError::Config(_))
        ));
    }

    #[test]
    fn test_attribute_value_conversion() {
        assert_eq!(
            to_otel_value(&AttributeValue::String("x".into())),
            Value::from("x".to_string())
        );
        assert_eq!(to_otel_value(&AttributeValue::I64(7)), Value::I64(7));
        assert_eq!(to_otel_value(&AttributeValue::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_kind_conversion() {
        assert_eq!(to_otel_kind(SpanKind::Server), OtelSpanKind::Server);
        assert_eq!(to_otel_kind(SpanKind::Internal), OtelSpanKind::Internal);
    }
}
