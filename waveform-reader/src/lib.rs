//! Reading the raw per-channel waveform streams of a run, framing them into
//! events, and converting runs to and from the single-file ntuple format.
pub mod error;
pub mod framer;
pub mod layout;
pub mod loader;
pub mod ntupler;
pub mod raw_stream;
pub mod source;

pub use error::{ReaderError, ReaderResult};
pub use framer::{Event, EventFramer};
pub use layout::RunLayout;
pub use loader::{NtupleFile, NtupleHeader, load_ntuple_file};
pub use ntupler::{NtupleWriter, Ntupler};
pub use raw_stream::RawChannelStream;
pub use source::{EventIter, EventSource};
