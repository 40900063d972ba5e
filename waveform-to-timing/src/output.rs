//! Writing the per-event results and the run settings.
use crate::{
    parameters::AnalysisSettings,
    processing::{EventRecord, EventSink},
};
use std::{
    fmt::Display,
    fs::File,
    io::{BufWriter, Error, Write},
    path::Path,
};

pub const CSV_HEADER: &str = "event,valid,amplitude,tot,noise,timing_trigger,timing_channel,timing_difference,npe,overshoot";

/// An unavailable value is written as an empty field.
struct Field<T>(Option<T>);

impl<T: Display> Display for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(value) => write!(f, "{value}"),
            None => Ok(()),
        }
    }
}

/// One line of scalars per event.
pub struct CsvSink<W: Write> {
    writer: W,
}

impl CsvSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, Error> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(mut writer: W) -> Result<Self, Error> {
        writeln!(writer, "{CSV_HEADER}")?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for CsvSink<W> {
    fn accept(&mut self, record: &EventRecord) -> Result<(), Error> {
        let decision = &record.decision;
        writeln!(
            self.writer,
            "{0},{1},{2},{3},{4},{5},{6},{7},{8},{9}",
            record.event_index,
            u8::from(decision.valid),
            Field(decision.amplitude),
            decision.tot,
            decision.noise,
            Field(record.trigger_time()),
            Field(record.channel_time()),
            Field(record.timing_difference()),
            Field(record.npe),
            Field(record.overshoot),
        )
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.writer.flush()
    }
}

/// Writes the effective settings as pretty printed JSON.
pub fn write_settings(path: &Path, settings: &AnalysisSettings) -> Result<(), Error> {
    let mut file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut file, settings)?;
    writeln!(file)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{EventProcessor, tests::event};
    use hrppd_common::Real;

    fn lines(sink: CsvSink<Vec<u8>>) -> Vec<String> {
        String::from_utf8(sink.into_inner())
            .unwrap()
            .lines()
            .map(ToOwned::to_owned)
            .collect()
    }

    #[test]
    fn header_only() {
        let sink = CsvSink::new(Vec::new()).unwrap();
        assert_eq!(lines(sink), vec![CSV_HEADER]);
    }

    #[test]
    fn invalid_event_has_empty_timing() {
        let record = EventProcessor::new(&AnalysisSettings::default()).process(&event(4, 0.0));
        let mut sink = CsvSink::new(Vec::new()).unwrap();
        sink.accept(&record).unwrap();
        sink.finish().unwrap();

        let lines = lines(sink);
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields.len(), 10);
        assert_eq!(fields[0], "4");
        assert_eq!(fields[1], "0");
        assert!(!fields[2].is_empty());
        assert!(fields[5..].iter().all(|field| field.is_empty()));
    }

    #[test]
    fn valid_event_has_timing() {
        let record = EventProcessor::new(&AnalysisSettings::default()).process(&event(7, 120.0));
        let mut sink = CsvSink::new(Vec::new()).unwrap();
        sink.accept(&record).unwrap();

        let lines = lines(sink);
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields[1], "1");
        let trigger: Real = fields[5].parse().unwrap();
        let channel: Real = fields[6].parse().unwrap();
        let difference: Real = fields[7].parse().unwrap();
        assert_eq!(difference, channel - trigger);
        assert!(fields[8..].iter().all(|field| !field.is_empty()));
    }

    #[test]
    fn settings_round_trip_through_json() {
        let path = std::env::temp_dir().join(format!("hrppd-{}-settings.json", std::process::id()));
        write_settings(&path, &AnalysisSettings::default()).unwrap();
        let json: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(json["calibration"], 0.48828125);
        assert_eq!(json["detector"]["window"]["min"], 500);
        assert_eq!(json["detector"]["polarity"], "negative");
        std::fs::remove_file(path).unwrap();
    }
}
