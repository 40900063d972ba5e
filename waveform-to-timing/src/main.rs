use anyhow::Context;
use clap::Parser;
use hrppd_common::{
    RunNumber, init_tracer,
    metrics::{
        component_info_metric,
        metric_names::{
            EVENTS_PROCESSED, EVENTS_READ, FAILURES, SIGNALS_ACCEPTED, TIMINGS_EXTRACTED,
        },
    },
    tracer::TracerOptions,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{fs::create_dir_all, net::SocketAddr, path::PathBuf};
use tracing::info;
use waveform_reader::{EventFramer, Ntupler, RunLayout, load_ntuple_file};
use waveform_to_timing::{
    AnalysisOptions, RunSummary,
    diagnostics::DiagnosticsWriter,
    output::{CsvSink, write_settings},
    process_run,
};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Directory holding the raw `run<N>` directories
    #[clap(long, env)]
    raw_data_path: PathBuf,

    /// Directory holding the ntuple files
    #[clap(long, env)]
    ntuple_path: PathBuf,

    #[clap(long)]
    run_number: RunNumber,

    /// Analyses only this many events from the start of the run, if given
    #[clap(long)]
    number_of_events: Option<usize>,

    /// If set, a run without an ntuple is read from its raw streams instead of being converted first
    #[clap(long)]
    no_auto_ntuplize: bool,

    /// Directory the results and the settings are written to
    #[clap(long, env, default_value = ".")]
    output_path: PathBuf,

    /// If set, SVG diagnostics of the first valid events are written to this directory
    #[clap(long)]
    diagnostics_path: Option<PathBuf>,

    /// Number of valid events to write diagnostics for
    #[clap(long, default_value = "200")]
    diagnostic_events: usize,

    #[clap(flatten)]
    analysis: AnalysisOptions,

    /// If set, metrics are served to Prometheus on this address
    #[clap(long)]
    observability_address: Option<SocketAddr>,

    /// If set, then OpenTelemetry data is sent to the URL specified, otherwise the standard tracing subscriber is used
    #[clap(long)]
    otel_endpoint: Option<String>,

    /// All OpenTelemetry spans are emitted with this as their `service.namespace` property
    #[clap(long, default_value = "")]
    otel_namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let _tracer = init_tracer!(TracerOptions::new(
        args.otel_endpoint.as_deref(),
        args.otel_namespace.clone()
    ));

    if let Some(address) = args.observability_address {
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("Prometheus metrics exporter should be set up")?;
    }
    component_info_metric("waveform-to-timing");

    // Metrics
    metrics::describe_counter!(
        EVENTS_READ,
        metrics::Unit::Count,
        "Number of events read from the raw streams"
    );
    metrics::describe_counter!(
        EVENTS_PROCESSED,
        metrics::Unit::Count,
        "Number of events processed"
    );
    metrics::describe_counter!(
        SIGNALS_ACCEPTED,
        metrics::Unit::Count,
        "Number of detector waveforms accepted as signals"
    );
    metrics::describe_counter!(
        TIMINGS_EXTRACTED,
        metrics::Unit::Count,
        "Number of CFD timings extracted"
    );
    metrics::describe_counter!(
        FAILURES,
        metrics::Unit::Count,
        "Number of failures encountered"
    );

    let diagnostic_events = if args.diagnostics_path.is_some() {
        args.diagnostic_events
    } else {
        0
    };
    let settings = args.analysis.to_settings(diagnostic_events);
    settings.validate()?;

    let run = args.run_number;
    let stem = format!("run{run}_ch{}", settings.channel);
    create_dir_all(&args.output_path)
        .with_context(|| format!("Cannot create {}", args.output_path.display()))?;
    write_settings(&args.output_path.join(format!("{stem}_settings.json")), &settings)
        .context("Cannot write the settings")?;
    let csv = CsvSink::create(&args.output_path.join(format!("{stem}.csv")))
        .context("Cannot create the results file")?;
    let diagnostics = args
        .diagnostics_path
        .as_deref()
        .map(|path| DiagnosticsWriter::new(path, &settings))
        .transpose()
        .context("Cannot create the diagnostics directory")?;
    let mut sink = (csv, diagnostics);

    let layout = RunLayout::new(&args.raw_data_path, &args.ntuple_path);
    let max_events = args.number_of_events;
    let auto_ntuplize = !args.no_auto_ntuplize;
    let summary: RunSummary = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        if auto_ntuplize && !layout.ntuple_exists(run) {
            info!("Run {run} has no ntuple, creating one");
            Ntupler::new(layout.clone(), settings.sample_interval)
                .convert(run, None)
                .with_context(|| format!("Cannot convert run {run}"))?;
        }
        let summary = if layout.ntuple_exists(run) {
            let source = load_ntuple_file(&layout.ntuple_file(run))?;
            info!("Reading {}", source.path().display());
            process_run(&source, &settings, &mut sink, max_events)?
        } else {
            let source = EventFramer::open(&layout, run, [settings.channel])?;
            info!("Reading {}", layout.run_directory(run).display());
            process_run(&source, &settings, &mut sink, max_events)?
        };
        Ok(summary)
    })
    .await?
    .with_context(|| format!("Cannot analyse run {run}"))?;

    info!(
        "Run {run}: {} events processed, {} valid, timing unavailable for {} triggers and {} channels",
        summary.processed,
        summary.valid,
        summary.trigger_timing_unavailable,
        summary.channel_timing_unavailable
    );
    Ok(())
}
