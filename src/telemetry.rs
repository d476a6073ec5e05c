use once_cell::sync::OnceCell;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

static PROVIDER: OnceCell<TracerProvider> = OnceCell::new();

/// Initialise logging, and OTLP trace export when an exporter endpoint is
/// configured. Without one, plain structured logging is installed.
pub fn init(cfg: &Config) {
    let default_filter = if cfg.debug {
        "imgrelay=debug,tower_http=debug"
    } else {
        "imgrelay=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let endpoint = match &cfg.otlp_endpoint {
        Some(endpoint) => endpoint,
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return;
        }
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            tracing::warn!(error = %e, "trace exporter init failed, telemetry disabled");
            return;
        }
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", "imgrelay"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("imgrelay");
    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    opentelemetry::global::set_tracer_provider(provider.clone());
    let _ = PROVIDER.set(provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();
}

/// Flush pending spans during graceful shutdown.
pub fn shutdown() {
    if let Some(provider) = PROVIDER.get() {
        for result in provider.force_flush() {
            if let Err(e) = result {
                tracing::warn!(error = %e, "trace flush failed");
            }
        }
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "trace provider shutdown failed");
        }
    }
}
