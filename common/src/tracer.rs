//! Logging for the pipeline binaries.
//!
//! Every binary logs to stdout, filtered by `RUST_LOG` (default `info`). When a
//! collector endpoint is given on the command line, spans are also exported over
//! OTLP, filtered separately by `OTEL_LEVEL` (default `off`), so that per-event
//! spans can be switched on for the collector without flooding the console.
use opentelemetry::{KeyValue, global::Error, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::Tracer};
use tracing::{level_filters::LevelFilter, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    EnvFilter, Layer, filter::Filtered, layer::SubscriberExt, registry::LookupSpan,
};

const STDOUT_LEVEL_VAR: &str = "RUST_LOG";
const COLLECTOR_LEVEL_VAR: &str = "OTEL_LEVEL";

/// Identifies the binary that is logging, as reported to the collector.
pub struct Component<'a> {
    pub binary: &'a str,
    pub version: &'a str,
    pub module: &'a str,
}

struct Collector<'a> {
    endpoint: &'a str,
    namespace: String,
}

pub struct TracerOptions<'a> {
    collector: Option<Collector<'a>>,
}

impl<'a> TracerOptions<'a> {
    /// `otel_endpoint` and `namespace` come straight from the command line.
    pub fn new(otel_endpoint: Option<&'a str>, namespace: String) -> Self {
        Self {
            collector: otel_endpoint.map(|endpoint| Collector {
                endpoint,
                namespace,
            }),
        }
    }
}

fn resource_attributes(component: &Component, namespace: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("service.name", component.binary.to_owned()),
        KeyValue::new("service.version", component.version.to_owned()),
        KeyValue::new("service.namespace", namespace.to_owned()),
        KeyValue::new("code.namespace", component.module.to_owned()),
    ]
}

fn level_filter(var: &str, default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(var)
        .from_env_lossy()
}

type CollectorLayer<S> = Filtered<OpenTelemetryLayer<S, Tracer>, EnvFilter, S>;

fn collector_layer<S>(
    collector: &Collector,
    component: &Component,
) -> Result<CollectorLayer<S>, TraceError>
where
    S: tracing::Subscriber,
    for<'span> S: LookupSpan<'span>,
{
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(collector.endpoint);
    let config = opentelemetry_sdk::trace::Config::default().with_resource(Resource::new(
        resource_attributes(component, &collector.namespace),
    ));
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(config)
        .with_exporter(exporter)
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    Ok(tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .with_filter(level_filter(COLLECTOR_LEVEL_VAR, LevelFilter::OFF)))
}

/// Holds the installed subscriber's collector state. Dropping it flushes any
/// spans still waiting to be exported.
pub struct TracerEngine {
    exporting: bool,
}

impl TracerEngine {
    /// Installs the global subscriber. A collector that cannot be reached is
    /// reported once on stdout and the binary carries on logging locally.
    pub fn new(options: TracerOptions, component: Component) -> Self {
        let (collector, failure) = match options
            .collector
            .map(|collector| collector_layer(&collector, &component))
        {
            Some(Ok(layer)) => (Some(layer), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };
        let exporting = collector.is_some();

        let stdout = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(level_filter(STDOUT_LEVEL_VAR, LevelFilter::INFO));
        let subscriber = tracing_subscriber::Registry::default()
            .with(stdout)
            .with(collector);

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("{} could not install its logger: {e}", component.binary);
        }
        if let Some(e) = failure {
            warn!("Spans will not be exported: {e}");
        }
        Self { exporting }
    }

    pub fn use_otel(&self) -> bool {
        self.exporting
    }

    pub fn set_otel_error_handler<F>(&self, f: F) -> Result<(), Error>
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        opentelemetry::global::set_error_handler(f)
    }
}

impl Drop for TracerEngine {
    fn drop(&mut self) {
        if self.exporting {
            opentelemetry::global::shutdown_tracer_provider()
        }
    }
}

/// Call once at the start of `main`, keeping the returned engine alive until exit.
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {{
        let tracer = $crate::tracer::TracerEngine::new(
            $options,
            $crate::tracer::Component {
                binary: env!("CARGO_BIN_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                module: module_path!(),
            },
        );
        // Registered here so collector errors are attributed to the binary's module.
        if tracer.use_otel() {
            if let Err(e) = tracer.set_otel_error_handler(|e| tracing::warn!("{e}")) {
                tracing::warn!("{e}");
            }
        }
        tracer
    }};
}
