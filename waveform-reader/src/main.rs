use anyhow::Context;
use clap::Parser;
use hrppd_common::{
    Real, RunNumber, init_tracer,
    metrics::component_info_metric,
    tracer::TracerOptions,
};
use std::path::PathBuf;
use tracing::info;
use waveform_reader::{Ntupler, RunLayout};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Directory holding the raw `run<N>` directories
    #[clap(long, env)]
    raw_data_path: PathBuf,

    /// Directory the ntuple file is written to
    #[clap(long, env)]
    ntuple_path: PathBuf,

    #[clap(long)]
    run_number: RunNumber,

    /// Converts only this many events from the start of the run, if given
    #[clap(long)]
    number_of_events: Option<usize>,

    /// Sample interval in picoseconds, recorded in the ntuple header
    #[clap(long, env, default_value = "200")]
    sample_interval: Real,

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
    component_info_metric("ntupler");

    let ntupler = Ntupler::new(
        RunLayout::new(&args.raw_data_path, &args.ntuple_path),
        args.sample_interval,
    );
    let run = args.run_number;
    let max_events = args.number_of_events;
    let (path, num_events) =
        tokio::task::spawn_blocking(move || ntupler.convert(run, max_events))
            .await?
            .with_context(|| format!("Cannot convert run {run}"))?;
    info!("Run {run}: {num_events} events in {}", path.display());
    Ok(())
}
