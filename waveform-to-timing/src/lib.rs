//! Conditioning HRPPD waveforms and extracting constant-fraction timings from them.
pub mod cfd;
pub mod conditioning;
pub mod derived;
pub mod diagnostics;
pub mod filter;
pub mod gate;
pub mod output;
pub mod parameters;
pub mod processing;
pub mod spline;

pub use parameters::{AnalysisOptions, AnalysisSettings};
pub use processing::{EventProcessor, EventRecord, EventSink, RunSummary, process_run};
