//! Tracing Setup
//!
//! Installs the process-wide tracing subscriber: a compact fmt layer for
//! local logs, plus an OTLP span exporter when [`TelemetrySettings`]
//! enables one. The OTLP endpoint and service name come from the same
//! [`crate::infrastructure::config::ManagerConfig`] everything else is
//! configured through; this module does not read the environment itself.
//!
//! An unreachable or misconfigured exporter never takes the service down:
//! the subscriber falls back to local logging and keeps running.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::TelemetrySettings;

/// Per-target defaults layered under `RUST_LOG`: the service itself at
/// info, its chatty transport internals (WebSocket, HTTP client/server)
/// at warn.
const DEFAULT_DIRECTIVES: &[&str] = &[
    "binance_stream_manager=info",
    "tungstenite=warn",
    "tokio_tungstenite=warn",
    "reqwest=warn",
    "hyper=warn",
    "h2=warn",
];

/// Guard returned by [`init`].
///
/// Dropping it flushes pending spans and shuts the OTLP pipeline down;
/// keep it alive for the life of the process.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("OpenTelemetry shutdown failed: {e}");
        }
    }
}

/// Build the env filter: `RUST_LOG` wins, the defaults above fill the
/// gaps.
fn build_filter() -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

/// Install a local-only subscriber (fmt layer, no export).
fn init_local() -> TelemetryGuard {
    tracing_subscriber::registry()
        .with(build_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    TelemetryGuard { provider: None }
}

/// Install the process-wide subscriber from settings.
///
/// With export disabled, or when the OTLP exporter cannot be built, the
/// service logs locally and the returned guard owns no pipeline.
#[must_use]
pub fn init(settings: &TelemetrySettings) -> TelemetryGuard {
    if !settings.otel_enabled {
        return init_local();
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            let guard = init_local();
            tracing::warn!(
                endpoint = %settings.otlp_endpoint,
                error = %e,
                "OTLP exporter unavailable; tracing locally only"
            );
            return guard;
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(settings.service_name.clone())
                .build(),
        )
        .build();

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(settings.service_name.clone()));

    tracing_subscriber::registry()
        .with(build_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(otel_layer)
        .init();

    TelemetryGuard {
        provider: Some(provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_all_parse() {
        for directive in DEFAULT_DIRECTIVES {
            assert!(
                directive
                    .parse::<tracing_subscriber::filter::Directive>()
                    .is_ok(),
                "directive {directive:?} does not parse"
            );
        }
    }

    #[test]
    fn directives_cover_the_service_itself() {
        assert!(
            DEFAULT_DIRECTIVES
                .iter()
                .any(|d| d.starts_with("binance_stream_manager="))
        );
    }

    #[test]
    fn guard_without_pipeline_drops_quietly() {
        drop(TelemetryGuard { provider: None });
    }
}
