use hrppd_common::EventIndex;
use std::path::PathBuf;
use thiserror::Error;

pub type ReaderResult<T> = Result<T, ReaderError>;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Cannot open trigger stream {path}: {source}")]
    TriggerStreamMissing {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid event index: {index} should be less than {num_events}")]
    EventOutOfRange {
        index: EventIndex,
        num_events: usize,
    },
    #[error("Expected {expected} bytes, got {got}")]
    UnexpectedEof { expected: usize, got: usize },
    #[error("Malformed ntuple header: {0}")]
    MalformedHeader(String),
    #[error("Expected a block of {expected} samples, got {got}")]
    BlockLength { expected: usize, got: usize },
    #[error("Ntuple body is not a whole number of events: {0} trailing bytes")]
    TrailingBytes(usize),
}
