//! Per-event processing and the parallel run driver.
use crate::{
    cfd::{CfdAnalysis, CfdDiscriminator, CfdError},
    conditioning::{ConditionedWaveform, Conditioner},
    derived::{npe, overshoot, timing_difference},
    filter::{FilteredWaveform, LowPassFilter},
    gate::{SignalDecision, SignalGate},
    parameters::AnalysisSettings,
};
use hrppd_common::{
    Channel, EventIndex, Real, SAMPLES_PER_EVENT,
    metrics::{
        failures::{self, FailureKind},
        metric_names::{EVENTS_PROCESSED, FAILURES, SIGNALS_ACCEPTED, TIMINGS_EXTRACTED},
        waveform_kind::{self, WaveformKind},
    },
};
use itertools::Itertools;
use metrics::counter;
use rayon::prelude::*;
use std::io;
use thiserror::Error;
use tracing::{debug, info, instrument};
use waveform_reader::{Event, EventSource, ReaderError, ReaderResult};

/// Events handed to the workers at a time.
const CHUNK_SIZE: usize = 1000;

pub type TimingResult = Result<Real, CfdError>;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Cannot read event: {0}")]
    Reader(#[from] ReaderError),
    #[error("Cannot write output: {0}")]
    Sink(#[from] io::Error),
}

/// Everything worked out for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_index: EventIndex,
    pub channel: Channel,
    pub conditioned_trigger: ConditionedWaveform,
    pub conditioned_channel: ConditionedWaveform,
    pub decision: SignalDecision,
    /// The remaining fields are only worked out for valid signals.
    pub timing_trigger: Option<TimingResult>,
    pub timing_channel: Option<TimingResult>,
    pub npe: Option<Real>,
    pub overshoot: Option<Real>,
    pub filtered: Option<FilteredWaveform>,
    pub trigger_analysis: Option<CfdAnalysis>,
    pub channel_analysis: Option<CfdAnalysis>,
}

impl EventRecord {
    pub fn trigger_time(&self) -> Option<Real> {
        self.timing_trigger.clone()?.ok()
    }

    pub fn channel_time(&self) -> Option<Real> {
        self.timing_channel.clone()?.ok()
    }

    pub fn timing_difference(&self) -> Option<Real> {
        timing_difference(self.trigger_time(), self.channel_time())
    }
}

/// Runs the stages over one event. Each worker owns one of these.
#[derive(Debug)]
pub struct EventProcessor {
    settings: AnalysisSettings,
    conditioner: Conditioner,
    gate: SignalGate,
    trigger_cfd: CfdDiscriminator,
    detector_cfd: CfdDiscriminator,
    filter: Option<LowPassFilter>,
    /// Valid events still to keep their CFD analyses for.
    analyses_remaining: usize,
}

impl EventProcessor {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            settings: settings.clone(),
            conditioner: Conditioner::new(settings),
            gate: SignalGate::new(settings),
            trigger_cfd: CfdDiscriminator::new(&settings.trigger, settings.sample_interval),
            detector_cfd: CfdDiscriminator::new(&settings.detector, settings.sample_interval),
            filter: settings.apply_filter.then(|| {
                LowPassFilter::new(
                    SAMPLES_PER_EVENT,
                    settings.fft_cutoff,
                    settings.sampling_rate,
                )
            }),
            analyses_remaining: settings.diagnostic_events,
        }
    }

    #[instrument(skip_all, level = "debug", fields(event = event.index, channel = self.settings.channel))]
    pub fn process(&mut self, event: &Event) -> EventRecord {
        let channel = self.settings.channel;
        let conditioned_trigger = self.conditioner.correct(&event.trigger);
        let conditioned_channel = match event.channel(channel) {
            Some(samples) => self.conditioner.correct(samples),
            None => {
                debug!("Event holds no waveform for channel {channel}");
                ConditionedWaveform::from(vec![0.0; event.trigger.len()])
            }
        };
        let decision = self.gate.decide(&conditioned_channel);
        counter!(EVENTS_PROCESSED).increment(1);

        let mut record = EventRecord {
            event_index: event.index,
            channel,
            conditioned_trigger,
            conditioned_channel,
            decision,
            timing_trigger: None,
            timing_channel: None,
            npe: None,
            overshoot: None,
            filtered: None,
            trigger_analysis: None,
            channel_analysis: None,
        };
        if !decision.valid {
            return record;
        }
        counter!(SIGNALS_ACCEPTED).increment(1);

        let keep = self.analyses_remaining > 0;
        self.analyses_remaining = self.analyses_remaining.saturating_sub(1);
        let (timing, analysis) =
            self.extract(WaveformKind::Trigger, &record.conditioned_trigger, keep);
        record.timing_trigger = Some(timing);
        record.trigger_analysis = analysis;
        let (timing, analysis) =
            self.extract(WaveformKind::Detector, &record.conditioned_channel, keep);
        record.timing_channel = Some(timing);
        record.channel_analysis = analysis;

        let detector = &self.settings.detector;
        record.npe = npe(
            &record.conditioned_channel,
            detector.window,
            self.settings.sample_interval,
        );
        record.overshoot = overshoot(&record.conditioned_channel, detector.window, detector.polarity);
        record.filtered = self
            .filter
            .as_mut()
            .map(|filter| filter.apply(&record.conditioned_channel));
        record
    }

    fn extract(
        &self,
        kind: WaveformKind,
        waveform: &[Real],
        keep: bool,
    ) -> (TimingResult, Option<CfdAnalysis>) {
        let discriminator = match kind {
            WaveformKind::Trigger => &self.trigger_cfd,
            WaveformKind::Detector => &self.detector_cfd,
        };
        match discriminator.analyse(waveform) {
            Ok(analysis) => {
                counter!(TIMINGS_EXTRACTED, &[waveform_kind::get_label(kind)]).increment(1);
                (Ok(analysis.crossing), keep.then_some(analysis))
            }
            Err(e) => {
                debug!("{kind:?} timing unavailable: {e}");
                counter!(FAILURES, &[failures::get_label(e.failure_kind())]).increment(1);
                (Err(e), None)
            }
        }
    }
}

/// Receives the records of a run in event order.
pub trait EventSink {
    fn accept(&mut self, record: &EventRecord) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EventSink for Vec<EventRecord> {
    fn accept(&mut self, record: &EventRecord) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

impl<T: EventSink> EventSink for Option<T> {
    fn accept(&mut self, record: &EventRecord) -> io::Result<()> {
        self.as_mut().map_or(Ok(()), |sink| sink.accept(record))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.as_mut().map_or(Ok(()), EventSink::finish)
    }
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn accept(&mut self, record: &EventRecord) -> io::Result<()> {
        self.0.accept(record)?;
        self.1.accept(record)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub valid: usize,
    pub trigger_timing_unavailable: usize,
    pub channel_timing_unavailable: usize,
}

impl RunSummary {
    fn record(&mut self, record: &EventRecord) {
        self.processed += 1;
        if record.decision.valid {
            self.valid += 1;
        }
        if matches!(record.timing_trigger, Some(Err(_))) {
            self.trigger_timing_unavailable += 1;
        }
        if matches!(record.timing_channel, Some(Err(_))) {
            self.channel_timing_unavailable += 1;
        }
    }
}

/// Processes the first `max_events` events of `source` (all of them if `None`).
///
/// Each rayon worker reads through its own reopened copy of the source. Records
/// reach `sink` in event order. The first event that cannot be read ends the run.
#[instrument(skip_all)]
pub fn process_run<S: EventSource, K: EventSink>(
    source: &S,
    settings: &AnalysisSettings,
    sink: &mut K,
    max_events: Option<usize>,
) -> Result<RunSummary, ProcessingError> {
    let num_events = max_events.map_or(source.num_events(), |max| {
        max.min(source.num_events())
    });
    let num_workers = rayon::current_num_threads().clamp(1, num_events.max(1));
    let mut workers = (0..num_workers)
        .map(|_| Ok((source.reopen()?, EventProcessor::new(settings))))
        .collect::<ReaderResult<Vec<_>>>()?;
    info!("Processing {num_events} events with {num_workers} workers");

    let mut summary = RunSummary::default();
    for chunk in &(0..num_events).chunks(CHUNK_SIZE) {
        let indices: Vec<EventIndex> = chunk.collect();
        let per_worker = indices.len().div_ceil(num_workers);
        let results: Vec<Vec<ReaderResult<EventRecord>>> = workers
            .par_iter_mut()
            .zip(indices.par_chunks(per_worker))
            .map(|((source, processor), indices)| {
                indices
                    .iter()
                    .map(|&index| Ok(processor.process(&source.read_event(index)?)))
                    .collect()
            })
            .collect();

        for result in results.into_iter().flatten() {
            let record = result.inspect_err(|_| {
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::EventReadFailed)]
                )
                .increment(1)
            })?;
            summary.record(&record);
            sink.accept(&record).inspect_err(|_| {
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::FileWriteFailed)]
                )
                .increment(1)
            })?;
        }
        info!("Processed {} of {num_events} events", summary.processed);
    }
    sink.finish()?;
    Ok(summary)
}
