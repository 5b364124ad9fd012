//! Tracing subscriber setup
//!
//! Console logging filtered by `RUST_LOG`, text or JSON, with optional OTLP
//! span export.
//!
//! Environment variables:
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP collector endpoint, export disabled when unset
//! - `OTEL_SERVICE_NAME` - Service name (default: `shardplane`)
//! - `LOG_FORMAT` - `json` for JSON output (default: `text`)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// OTLP endpoint for span export (None = disabled)
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    /// "text" or "json"
    pub log_format: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: "shardplane".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_format: std::env::var("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    fn is_json(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

fn build_provider(
    endpoint: &str,
    service_name: &str,
) -> Result<SdkTracerProvider, Box<dyn std::error::Error + Send + Sync>> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Install the global subscriber.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let provider = build_provider(endpoint, &config.service_name)?;
            let tracer = provider.tracer("shardplane");
            let _ = TRACER_PROVIDER.set(provider);
            Some(OpenTelemetryLayer::new(tracer))
        }
        None => None,
    };

    let fmt_layer = if config.is_json() {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(fmt_layer)
        .init();

    match &config.otlp_endpoint {
        Some(endpoint) => tracing::info!(
            endpoint = %endpoint,
            service_name = %config.service_name,
            "OpenTelemetry tracing initialized"
        ),
        None => tracing::debug!("Tracing initialized (no OTLP export)"),
    }

    Ok(())
}

/// Flush pending spans. Call once on shutdown.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Error shutting down tracer provider");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "shardplane");
        assert!(!config.is_json());
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_json_format_is_case_insensitive() {
        let config = TracingConfig {
            log_format: "JSON".to_string(),
            ..TracingConfig::default()
        };
        assert!(config.is_json());
    }
}
