use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporterBuilder, WithExportConfig};
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, Config, TracerProvider};
use opentelemetry_sdk::Resource;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Telemetry handle exporting scan-phase spans over OTLP/HTTP.
pub(crate) struct Telemetry {
    tracer: opentelemetry_sdk::trace::Tracer,
    provider: TracerProvider,
    _runtime: tokio::runtime::Runtime,
}

impl Telemetry {
    /// Initialize telemetry with an OTLP HTTP exporter.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(&endpoint)?;
        let exporter = SpanExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint)
                .with_http_client(reqwest::Client::new()),
        )
        .build_span_exporter()
        .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    /// Run a closure inside a named span.
    pub(crate) fn in_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute.clone());
            }
            f()
        })
    }

    /// Flush spans and shut down the tracer provider.
    pub(crate) fn shutdown(&self) -> Result<()> {
        opentelemetry::global::shutdown_tracer_provider();
        Ok(())
    }

    fn from_exporter<E>(exporter: E) -> Result<Self>
    where
        E: SpanExporter + 'static,
    {
        let resource = Resource::new(vec![KeyValue::new("service.name", "classweave")]);
        install_error_handler();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("build Tokio runtime")?;
        let _guard = runtime.enter();
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(16_384)
            .with_scheduled_delay(Duration::from_millis(200))
            .with_max_export_timeout(Duration::from_secs(10))
            .build();
        let processor = BatchSpanProcessor::builder(exporter, Tokio)
            .with_batch_config(batch_config)
            .build();
        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .with_config(Config::default().with_resource(resource))
            .build();
        let tracer = provider.tracer("classweave");
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self {
            tracer,
            provider,
            _runtime: runtime,
        })
    }
}

/// Accept collector base URLs as well as full `/v1/traces` endpoints.
fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    if url.path() == "/" {
        url.set_path("/v1/traces");
    }
    Ok(url.to_string())
}

/// Initialize the logging facade with stderr output. `RUST_LOG` overrides
/// the default filter.
pub(crate) fn init_logging() {
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("classweave=info,warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

fn install_error_handler() {
    static SET_ERROR_HANDLER: Once = Once::new();
    static LOGGED_ERROR: AtomicBool = AtomicBool::new(false);
    SET_ERROR_HANDLER.call_once(|| {
        let _ = opentelemetry::global::set_error_handler(move |err| {
            // Log the first export failure only; a collector outage should
            // not flood stderr.
            if LOGGED_ERROR.swap(true, Ordering::Relaxed) {
                return;
            }
            error!("OpenTelemetry export error occurred: {err}");
        });
    });
}

/// Run `f` inside a span when telemetry is enabled, plain otherwise.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};

    #[derive(Debug)]
    struct NoopExporter;

    impl SpanExporter for NoopExporter {
        fn export(&mut self, _batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn telemetry_uses_exporter_without_errors() {
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        telemetry.in_span("test", &[KeyValue::new("test.key", "value")], || {});
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn normalize_root_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn explicit_trace_path_is_preserved() {
        let endpoint = normalize_otlp_http_trace_endpoint("http://localhost:4318/v1/traces")
            .expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }
}
