//! Telemetry setup for tracing and logging.

use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "migrator";

/// Environment variable for service name (not exported by opentelemetry_sdk).
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Flushes exported spans when dropped.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("Failed to shutdown tracer provider: {e}");
			}
		}
	}
}

/// Initialize tracing.
///
/// The level comes from `log_level` (the `--log-level` flag), else
/// `RUST_LOG`, else info. Logs go to stderr, pretty on a terminal and JSON
/// otherwise.
///
/// Spans are exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` or
/// `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set; the exporter is configured
/// through the standard OTEL variables. Must be called inside the tokio
/// runtime.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	let fmt = if std::io::stderr().is_terminal() {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.pretty()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.boxed()
	};

	let registry = tracing_subscriber::registry().with(filter).with(fmt);

	if !otel_export_enabled() {
		registry.init();
		return Ok(TelemetryGuard {
			tracer_provider: None,
		});
	}

	let tracer_provider = tracer_provider()?;
	registry
		.with(
			tracing_opentelemetry::layer()
				.with_error_records_to_exceptions(true)
				.with_tracer(tracer_provider.tracer(SERVICE_NAME)),
		)
		.init();
	opentelemetry::global::set_tracer_provider(tracer_provider.clone());

	Ok(TelemetryGuard {
		tracer_provider: Some(tracer_provider),
	})
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	// Resource::builder() reads OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES itself
	let mut resource = Resource::builder();
	if std::env::var(OTEL_SERVICE_NAME).is_err() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL);
	let exporter = match protocol
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		_ => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build())
}
