//! Subscriber setup: JSON logs always, OTLP spans only when an endpoint is set.

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Name reported as `service.name` on exported spans.
const SERVICE_NAME: &str = "webservice";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `log_level` when both are present. With no
/// `otlp_endpoint` nothing leaves the process except stdout.
///
/// # Errors
///
/// Returns an error if `log_level` is not a valid filter, the OTLP exporter
/// cannot be built, or a subscriber is already installed.
pub fn init_telemetry(otlp_endpoint: Option<&str>, log_level: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid LOG_LEVEL {log_level:?}"))?,
    };

    let otel_layer = otlp_endpoint
        .map(otlp_tracer)
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
        .with(otel_layer)
        .try_init()
        .context("failed to initialise tracing subscriber")
}

/// Flush spans still buffered by the batch exporter. A no-op without OTLP.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

fn otlp_tracer(endpoint: &str) -> Result<Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default().with_resource(Resource::new([
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    SERVICE_NAME,
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    env!("CARGO_PKG_VERSION"),
                ),
            ])),
        )
        .install_batch(runtime::Tokio)
        .with_context(|| format!("failed to install OTLP pipeline for {endpoint}"))
}
