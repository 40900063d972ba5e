//! Reading ntuple files.
//!
//! An ntuple gathers a whole run into one file: a header describing the run and
//! its channels, then one record per event holding the event number, the trigger
//! block and one block per channel, all little-endian.
use crate::{
    error::{ReaderError, ReaderResult},
    framer::Event,
    raw_stream::{fill_bytes, load_samples},
    source::EventSource,
};
use hrppd_common::{
    BYTES_PER_SAMPLE, Channel, EventIndex, MAX_DETECTOR_CHANNELS, Real, SAMPLES_PER_EVENT,
    metrics::metric_names::EVENTS_READ,
};
use metrics::counter;
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    mem::size_of,
    path::{Path, PathBuf},
};

/// Longest header string accepted, guards against reading garbage as a length.
const MAX_STRING_BYTES: usize = 1 << 16;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NtupleHeader {
    pub prog_version: String,
    pub run_descript: String,
    pub run_number: i32,
    pub number_of_channels: i32,
    pub channel_ids: Vec<i32>,
    pub channel_present: Vec<bool>,
    pub number_of_samples: i32,
    pub sample_time: Real,
}

impl NtupleHeader {
    pub(crate) fn load<R: Read>(reader: &mut R) -> ReaderResult<Self> {
        let mut total_bytes = usize::default();
        let prog_version = load_string(reader, &mut total_bytes)?;
        let run_descript = load_string(reader, &mut total_bytes)?;
        let run_number = load_i32(reader, &mut total_bytes)?;
        let number_of_channels = load_i32(reader, &mut total_bytes)?;
        let num_channels = usize::try_from(number_of_channels)
            .ok()
            .filter(|&n| n <= MAX_DETECTOR_CHANNELS)
            .ok_or_else(|| {
                ReaderError::MalformedHeader(format!(
                    "{number_of_channels} channels, expected at most {MAX_DETECTOR_CHANNELS}"
                ))
            })?;
        let header = NtupleHeader {
            prog_version,
            run_descript,
            run_number,
            number_of_channels,
            channel_ids: load_i32_vec(reader, num_channels, &mut total_bytes)?,
            channel_present: load_bool_vec(reader, num_channels, &mut total_bytes)?,
            number_of_samples: load_i32(reader, &mut total_bytes)?,
            sample_time: load_f64(reader, &mut total_bytes)?,
        };
        if header.number_of_samples as usize != SAMPLES_PER_EVENT {
            return Err(ReaderError::MalformedHeader(format!(
                "{} samples per event, expected {SAMPLES_PER_EVENT}",
                header.number_of_samples
            )));
        }
        if let Some(id) = header.channel_ids.iter().find(|&&id| id < 0) {
            return Err(ReaderError::MalformedHeader(format!(
                "negative channel id {id}"
            )));
        }
        debug_assert_eq!(total_bytes, header.get_size());
        Ok(header)
    }

    pub(crate) fn get_size(&self) -> usize {
        size_of::<i32>() + self.prog_version.len() + // prog_version
        size_of::<i32>() + self.run_descript.len() + // run_descript
        size_of::<i32>() + // run_number
        size_of::<i32>() + // number_of_channels
        size_of::<i32>() * self.channel_ids.len() + // channel_ids
        size_of::<u8>() * self.channel_present.len() + // channel_present
        size_of::<i32>() + // number_of_samples
        size_of::<f64>() // sample_time
    }

    pub(crate) fn get_event_size(&self) -> usize {
        size_of::<i32>() + (1 + self.channel_ids.len()) * SAMPLES_PER_EVENT * BYTES_PER_SAMPLE
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channel_ids.iter().map(|&id| id as Channel).collect()
    }
}

#[derive(Debug)]
pub struct NtupleFile {
    path: PathBuf,
    file: File,
    header: NtupleHeader,
    num_events: usize,
}

impl NtupleFile {
    pub fn header(&self) -> &NtupleHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_event(&mut self, index: EventIndex) -> ReaderResult<Event> {
        if index >= self.num_events {
            return Err(ReaderError::EventOutOfRange {
                index,
                num_events: self.num_events,
            });
        }
        self.file.seek(SeekFrom::Start(
            (self.header.get_size() + index * self.header.get_event_size()) as u64,
        ))?;
        let mut total_bytes = usize::default();
        let _event_number = load_i32(&mut self.file, &mut total_bytes)?;
        let trigger = load_samples(&mut self.file, SAMPLES_PER_EVENT)?;
        let channels = self
            .header
            .channels()
            .into_iter()
            .map(|channel| {
                let samples = load_samples(&mut self.file, SAMPLES_PER_EVENT)?;
                Ok::<_, ReaderError>((channel, samples))
            })
            .collect::<ReaderResult<_>>()?;
        counter!(EVENTS_READ).increment(1);
        Ok(Event {
            index,
            trigger,
            channels,
        })
    }
}

impl EventSource for NtupleFile {
    fn num_events(&self) -> usize {
        self.num_events
    }

    fn channels(&self) -> Vec<Channel> {
        self.header.channels()
    }

    fn read_event(&mut self, index: EventIndex) -> ReaderResult<Event> {
        self.get_event(index)
    }

    fn reopen(&self) -> ReaderResult<Self> {
        load_ntuple_file(&self.path)
    }
}

pub fn load_ntuple_file(path: &Path) -> ReaderResult<NtupleFile> {
    let mut file = File::open(path)?;
    let header = NtupleHeader::load(&mut file)?;
    let file_size = file.metadata()?.len() as usize;
    let size_minus_header = file_size.checked_sub(header.get_size()).ok_or_else(|| {
        ReaderError::MalformedHeader(format!(
            "file of {file_size} bytes is shorter than its header"
        ))
    })?;
    let event_size = header.get_event_size();
    if size_minus_header % event_size != 0 {
        Err(ReaderError::TrailingBytes(size_minus_header % event_size))
    } else {
        Ok(NtupleFile {
            path: path.to_owned(),
            file,
            header,
            num_events: size_minus_header / event_size,
        })
    }
}

fn load_scalar<R: Read, const B: usize>(
    reader: &mut R,
    total_bytes: &mut usize,
) -> ReaderResult<[u8; B]> {
    let mut bytes = [0; B];
    fill_bytes(reader, &mut bytes)?;
    *total_bytes += B;
    Ok(bytes)
}

pub(crate) fn load_i32<R: Read>(reader: &mut R, total_bytes: &mut usize) -> ReaderResult<i32> {
    Ok(i32::from_le_bytes(load_scalar(reader, total_bytes)?))
}

pub(crate) fn load_f64<R: Read>(reader: &mut R, total_bytes: &mut usize) -> ReaderResult<f64> {
    Ok(f64::from_le_bytes(load_scalar(reader, total_bytes)?))
}

pub(crate) fn load_bool<R: Read>(reader: &mut R, total_bytes: &mut usize) -> ReaderResult<bool> {
    Ok(u8::from_le_bytes(load_scalar(reader, total_bytes)?) != 0)
}

pub(crate) fn load_bool_vec<R: Read>(
    reader: &mut R,
    size: usize,
    total_bytes: &mut usize,
) -> ReaderResult<Vec<bool>> {
    (0..size).map(|_| load_bool(reader, total_bytes)).collect()
}

pub(crate) fn load_i32_vec<R: Read>(
    reader: &mut R,
    size: usize,
    total_bytes: &mut usize,
) -> ReaderResult<Vec<i32>> {
    (0..size).map(|_| load_i32(reader, total_bytes)).collect()
}

pub(crate) fn load_string<R: Read>(
    reader: &mut R,
    total_bytes: &mut usize,
) -> ReaderResult<String> {
    let size = load_i32(reader, total_bytes)?;
    let size = usize::try_from(size)
        .ok()
        .filter(|&size| size <= MAX_STRING_BYTES)
        .ok_or_else(|| ReaderError::MalformedHeader(format!("string of length {size}")))?;
    let mut string_bytes = vec![0; size];
    fill_bytes(reader, &mut string_bytes)?;
    *total_bytes += size;
    String::from_utf8(string_bytes).map_err(|e| ReaderError::MalformedHeader(e.to_string()))
}
