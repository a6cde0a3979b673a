//! Telemetry initialization.
//!
//! - `TANDEM_LOG` is an [`EnvFilter`] directive (default `info`).
//! - `TANDEM_LOG_FORMAT=json` switches stderr output to JSON lines;
//!   anything else is the human-readable formatter.
//! - With the `otel` feature and `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans
//!   are also exported over OTLP HTTP.
//!
//! Logs always go to stderr so `tandem pending`/`commit` output on stdout
//! stays machine-readable.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "TANDEM_LOG";

/// Environment variable selecting the stderr format.
pub const LOG_FORMAT_ENV: &str = "TANDEM_LOG_FORMAT";

/// Opaque guard; dropping it flushes and shuts down the OTLP pipeline.
/// Hold this in `main()` until exit.
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    trace_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        {
            if let Some(provider) = self.trace_provider.take()
                && let Err(e) = provider.shutdown()
            {
                eprintln!("otel trace shutdown error: {e}");
            }
        }
    }
}

/// Output format for stderr logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// `tracing-subscriber`'s default human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse a `TANDEM_LOG_FORMAT` value. Unknown values fall back to
    /// [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// Returns a guard that must be held until the program exits.
#[must_use]
pub fn init() -> TelemetryGuard {
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    #[cfg(feature = "otel")]
    {
        let (otel_layer, trace_provider) = match otlp_endpoint() {
            Some(_) => match init_otlp() {
                Ok((layer, provider)) => (Some(layer), Some(provider)),
                Err(e) => {
                    eprintln!("warning: failed to init OTLP span exporter: {e}");
                    (None, None)
                }
            },
            None => (None, None),
        };
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(otel_layer)
            .init();
        TelemetryGuard { trace_provider }
    }

    #[cfg(not(feature = "otel"))]
    {
        if otlp_endpoint().is_some() {
            eprintln!(
                "warning: OTEL_EXPORTER_OTLP_ENDPOINT set but tandem built without 'otel' feature"
            );
        }
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        TelemetryGuard {}
    }
}

fn otlp_endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// OTLP HTTP span export.
///
/// The SDK reads `OTEL_EXPORTER_OTLP_ENDPOINT` itself and appends
/// `/v1/traces`. The batch processor runs on its own thread, so spans
/// closed on tokio workers never block on the exporter.
#[cfg(feature = "otel")]
fn init_otlp<S>() -> Result<
    (
        tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>,
        opentelemetry_sdk::trace::SdkTracerProvider,
    ),
    opentelemetry_otlp::ExporterBuildError,
>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::KeyValue;
    use opentelemetry::trace::TracerProvider as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_attribute(KeyValue::new("service.name", env!("CARGO_PKG_NAME")))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
    Ok((tracing_opentelemetry::layer().with_tracer(tracer), provider))
}
