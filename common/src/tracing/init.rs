use crate::error::{DeployError, Result};
use crate::inputs::parse_flag;
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_sdk::Resource;
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const TRACING_FLAG: &str = "DEPLOY_ENABLE_TRACING";
pub const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

pub struct OtelGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            // flush remaining spans on shutdown
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {}", e);
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

/// the collector endpoint, only when export is switched on
fn otlp_endpoint() -> Option<String> {
    let enabled = env::var(TRACING_FLAG)
        .ok()
        .and_then(|v| parse_flag(&v))
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    env::var(OTLP_ENDPOINT).ok().filter(|v| !v.trim().is_empty())
}

/// logs go to stderr so stdout stays clean for json output
pub fn init_tracing(service_name: &str) -> Result<OtelGuard> {
    let Some(endpoint_url) = otlp_endpoint() else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter())
            .finish()
            .try_init()
            .map_err(|e| DeployError::Tracing(e.to_string()))?;

        tracing::debug!("basic logging initialized (service={})", service_name);

        return Ok(OtelGuard {
            tracer_provider: None,
        });
    };

    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint_url)
        .build()
        .map_err(|e| DeployError::Tracing(format!("exporter build failed: {}", e)))?;

    let resource = Resource::builder_empty()
        .with_attribute(KeyValue::new("service.name", service_name.to_string()))
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let telemetry =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));

    tracing_subscriber::registry()
        .with(telemetry)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .try_init()
        .map_err(|e| DeployError::Tracing(e.to_string()))?;

    tracing::info!(
        "opentelemetry tracing initialized for {} (endpoint: {})",
        service_name,
        endpoint_url
    );

    Ok(OtelGuard {
        tracer_provider: Some(provider),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_installs_subscriber_once() {
        // export flag is unset in the test environment
        let _guard = init_tracing("test").unwrap();
        tracing::info!("logging ready");

        let second = init_tracing("test");
        assert!(matches!(second, Err(DeployError::Tracing(_))));
    }
}
