//! Per-channel raw sample streams.
//!
//! A raw stream is the concatenation of one block of [SAMPLES_PER_EVENT]
//! little-endian `f32` samples per event, with no header and no delimiter.
use crate::error::{ReaderError, ReaderResult};
use hrppd_common::{BYTES_PER_EVENT, BYTES_PER_SAMPLE, EventIndex, SAMPLES_PER_EVENT, Sample};
use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use tracing::warn;

#[derive(Debug)]
pub struct RawChannelStream {
    path: PathBuf,
    file: File,
    num_events: usize,
}

impl RawChannelStream {
    /// Opens the stream and derives the number of whole events it holds.
    /// A partial block at the end of the file is ignored.
    pub fn open(path: &Path) -> ReaderResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len() as usize;
        let trailing = file_size % BYTES_PER_EVENT;
        if trailing != 0 {
            warn!(
                "Stream {} ends with {trailing} bytes of an incomplete event, these are ignored",
                path.display()
            );
        }
        Ok(Self {
            path: path.to_owned(),
            file,
            num_events: file_size / BYTES_PER_EVENT,
        })
    }

    /// Opens a fresh handle on the same file, with its own cursor.
    pub fn reopen(&self) -> ReaderResult<Self> {
        Self::open(&self.path)
    }

    pub fn num_events(&self) -> usize {
        self.num_events
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_block(&mut self, index: EventIndex) -> ReaderResult<Vec<Sample>> {
        if index >= self.num_events {
            return Err(ReaderError::EventOutOfRange {
                index,
                num_events: self.num_events,
            });
        }
        self.file
            .seek(SeekFrom::Start((index * BYTES_PER_EVENT) as u64))?;
        load_samples(&mut self.file, SAMPLES_PER_EVENT)
    }
}

/// Fills `bytes` from `reader`, reporting how far it got if the data runs out.
pub(crate) fn fill_bytes<R: Read>(reader: &mut R, bytes: &mut [u8]) -> ReaderResult<()> {
    let mut got = 0;
    while got < bytes.len() {
        match reader.read(&mut bytes[got..]) {
            Ok(0) => {
                return Err(ReaderError::UnexpectedEof {
                    expected: bytes.len(),
                    got,
                });
            }
            Ok(num_bytes) => got += num_bytes,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads `size` little-endian samples from `reader`.
pub(crate) fn load_samples<R: Read>(reader: &mut R, size: usize) -> ReaderResult<Vec<Sample>> {
    let mut bytes = vec![0; size * BYTES_PER_SAMPLE];
    fill_bytes(reader, &mut bytes)?;
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| {
            let mut sample = [0; BYTES_PER_SAMPLE];
            sample.copy_from_slice(chunk);
            Sample::from_le_bytes(sample)
        })
        .collect())
}

/// Appends one block of samples in the raw stream encoding.
pub fn write_block<W: Write>(writer: &mut W, samples: &[Sample]) -> std::io::Result<()> {
    for sample in samples {
        writer.write_all(&sample.to_le_bytes())?;
    }
    Ok(())
}
