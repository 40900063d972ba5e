pub mod metrics;
pub mod tracer;

/// A single digitised sample as stored on disk.
pub type Sample = f32;
/// Working precision of the conditioning and timing stages.
pub type Real = f64;

/// Detector channel identifier, as used in the `wave_<channel>.dat` file names.
pub type Channel = u32;
pub type EventIndex = usize;
pub type RunNumber = u32;

/// Number of samples digitised per channel per event.
pub const SAMPLES_PER_EVENT: usize = 1024;

/// Number of leading samples used to estimate the pedestal and the noise floor.
pub const BASELINE_SAMPLES: usize = 128;

/// The digitiser provides at most this many detector channels besides the trigger.
pub const MAX_DETECTOR_CHANNELS: usize = 16;

pub const BYTES_PER_SAMPLE: usize = size_of::<Sample>();
pub const BYTES_PER_EVENT: usize = SAMPLES_PER_EVENT * BYTES_PER_SAMPLE;

/// Returns an iterator over every detector channel the digitiser can provide.
pub fn detector_channels() -> impl Iterator<Item = Channel> {
    0..MAX_DETECTOR_CHANNELS as Channel
}
