//! Converting a run's raw streams into an ntuple file.
use crate::{
    error::{ReaderError, ReaderResult},
    framer::{Event, EventFramer, zero_block},
    layout::RunLayout,
    loader::NtupleHeader,
    raw_stream::write_block,
    source::EventSource,
};
use chrono::Utc;
use hrppd_common::{
    Channel, Real, RunNumber, SAMPLES_PER_EVENT, Sample, detector_channels,
    metrics::{
        failures::{self, FailureKind},
        metric_names::FAILURES,
    },
};
use metrics::counter;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

pub const PROG_VERSION: &str = concat!("hrppd-ntupler ", env!("CARGO_PKG_VERSION"));
const PROGRESS_INTERVAL: usize = 1000;

fn save_i32<W: Write>(writer: &mut W, value: i32) -> ReaderResult<()> {
    Ok(writer.write_all(&value.to_le_bytes())?)
}

fn save_f64<W: Write>(writer: &mut W, value: f64) -> ReaderResult<()> {
    Ok(writer.write_all(&value.to_le_bytes())?)
}

fn save_bool<W: Write>(writer: &mut W, value: bool) -> ReaderResult<()> {
    Ok(writer.write_all(&[u8::from(value)])?)
}

fn save_string<W: Write>(writer: &mut W, value: &str) -> ReaderResult<()> {
    save_i32(writer, value.len() as i32)?;
    Ok(writer.write_all(value.as_bytes())?)
}

fn save_block<W: Write>(writer: &mut W, samples: &[Sample]) -> ReaderResult<()> {
    if samples.len() != SAMPLES_PER_EVENT {
        return Err(ReaderError::BlockLength {
            expected: SAMPLES_PER_EVENT,
            got: samples.len(),
        });
    }
    Ok(write_block(writer, samples)?)
}

impl NtupleHeader {
    pub(crate) fn save<W: Write>(&self, writer: &mut W) -> ReaderResult<()> {
        save_string(writer, &self.prog_version)?;
        save_string(writer, &self.run_descript)?;
        save_i32(writer, self.run_number)?;
        save_i32(writer, self.number_of_channels)?;
        for &id in &self.channel_ids {
            save_i32(writer, id)?;
        }
        for &present in &self.channel_present {
            save_bool(writer, present)?;
        }
        save_i32(writer, self.number_of_samples)?;
        save_f64(writer, self.sample_time)
    }
}

/// Streams events into an ntuple, header first.
pub struct NtupleWriter<W: Write> {
    writer: W,
    header: NtupleHeader,
    events_written: usize,
}

impl<W: Write> NtupleWriter<W> {
    pub fn new(mut writer: W, header: NtupleHeader) -> ReaderResult<Self> {
        header.save(&mut writer)?;
        Ok(Self {
            writer,
            header,
            events_written: 0,
        })
    }

    /// Appends the event. Channels named in the header but absent from the event are written as zeros.
    pub fn push(&mut self, event: &Event) -> ReaderResult<()> {
        save_i32(&mut self.writer, event.index as i32)?;
        save_block(&mut self.writer, &event.trigger)?;
        for &id in &self.header.channel_ids {
            match event.channel(id as Channel) {
                Some(samples) => save_block(&mut self.writer, samples)?,
                None => save_block(&mut self.writer, &zero_block())?,
            }
        }
        self.events_written += 1;
        Ok(())
    }

    pub fn events_written(&self) -> usize {
        self.events_written
    }

    pub fn finish(mut self) -> ReaderResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

pub struct Ntupler {
    layout: RunLayout,
    sample_interval: Real,
}

impl Ntupler {
    pub fn new(layout: RunLayout, sample_interval: Real) -> Self {
        Self {
            layout,
            sample_interval,
        }
    }

    /// Writes the first `max_events` events of the run (every event if `None`) to the run's ntuple file.
    ///
    /// The file only appears under its final name once it is complete.
    /// Returns the path written and the number of events it holds.
    #[instrument(skip(self))]
    pub fn convert(
        &self,
        run: RunNumber,
        max_events: Option<usize>,
    ) -> ReaderResult<(PathBuf, usize)> {
        let mut framer = EventFramer::open(&self.layout, run, detector_channels())?;
        let channels = framer.channels();
        let header = NtupleHeader {
            prog_version: PROG_VERSION.to_owned(),
            run_descript: format!("Run {run} converted {}", Utc::now().to_rfc3339()),
            run_number: run as i32,
            number_of_channels: channels.len() as i32,
            channel_ids: channels.iter().map(|&channel| channel as i32).collect(),
            channel_present: channels
                .iter()
                .map(|&channel| framer.is_present(channel))
                .collect(),
            number_of_samples: SAMPLES_PER_EVENT as i32,
            sample_time: self.sample_interval,
        };
        let num_events = max_events.map_or(framer.num_events(), |max| {
            max.min(framer.num_events())
        });
        info!("Converting {num_events} events of run {run}");

        fs::create_dir_all(self.layout.ntuple_path())?;
        let path = self.layout.ntuple_file(run);
        let partial_path = path.with_extension("bin.partial");
        let result = Self::write_events(&mut framer, header, &partial_path, num_events);
        if let Err(e) = result {
            counter!(
                FAILURES,
                &[failures::get_label(FailureKind::FileWriteFailed)]
            )
            .increment(1);
            let _ = fs::remove_file(&partial_path);
            return Err(e);
        }
        fs::rename(&partial_path, &path)?;
        info!("Wrote {num_events} events to {}", path.display());
        Ok((path, num_events))
    }

    fn write_events(
        framer: &mut EventFramer,
        header: NtupleHeader,
        path: &Path,
        num_events: usize,
    ) -> ReaderResult<()> {
        let mut writer = NtupleWriter::new(BufWriter::new(File::create(path)?), header)?;
        for event in framer.events().take(num_events) {
            writer.push(&event?)?;
            if writer.events_written() % PROGRESS_INTERVAL == 0 {
                info!("Converted {} of {num_events} events", writer.events_written());
            }
        }
        writer.finish()?;
        Ok(())
    }
}
