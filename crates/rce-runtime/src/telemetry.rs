//! Tracing setup for processes that host the bridge.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `RCE_LOG_FORMAT=json` | Newline-delimited JSON instead of compact lines. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL; enables OTLP/HTTP span export. |
//!
//! ```rust,no_run
//! let _guard = rce_runtime::telemetry::init_tracing("rce-bridge");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Read `RCE_LOG_FORMAT`; anything but `json` means compact.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("RCE_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Install the global subscriber.
///
/// Hold the returned guard for the life of the process; dropping it flushes
/// and shuts down the span exporter.  If a global subscriber is already set
/// the existing one is kept and only the guard is returned.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_env();
    let provider = build_provider(service_name);

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("rce-bridge")));
    let json_layer = (format == LogFormat::Json).then(|| fmt::layer().json());
    let compact_layer = (format == LogFormat::Compact).then(|| fmt::layer().compact());

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
    {
        eprintln!("[rce] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTel provider down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[rce] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[rce] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the host may not have a Tokio runtime running yet.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
