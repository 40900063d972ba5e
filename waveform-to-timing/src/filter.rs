//! Frequency-domain low-pass filtering of conditioned waveforms.
use hrppd_common::Real;
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::{fmt, sync::Arc};

pub const DEFAULT_ORDER: i32 = 8;

/// Spectrum values below this are reported as this, in dB.
const SPECTRUM_FLOOR_DB: Real = -200.0;

/// Butterworth-style magnitude response at `frequency`.
pub fn butterworth_response(frequency: Real, cutoff: Real, order: i32) -> Real {
    1.0 / (1.0 + (frequency / cutoff).powi(2 * order))
}

/// The filtered waveform together with its spectrum before and after filtering.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct FilteredWaveform {
    pub samples: Vec<Real>,
    /// `20·log10(|X_k|/√N)` for the first `N/2` bins.
    pub spectrum_before: Vec<Real>,
    pub spectrum_after: Vec<Real>,
}

pub struct LowPassFilter {
    size: usize,
    cutoff: Real,
    sampling_rate: Real,
    order: i32,
    forward: Arc<dyn Fft<Real>>,
    inverse: Arc<dyn Fft<Real>>,
    scratch: Vec<Complex<Real>>,
}

impl fmt::Debug for LowPassFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowPassFilter")
            .field("size", &self.size)
            .field("cutoff", &self.cutoff)
            .field("sampling_rate", &self.sampling_rate)
            .field("order", &self.order)
            .finish()
    }
}

impl LowPassFilter {
    pub fn new(size: usize, cutoff: Real, sampling_rate: Real) -> Self {
        Self::with_order(size, cutoff, sampling_rate, DEFAULT_ORDER)
    }

    pub fn with_order(size: usize, cutoff: Real, sampling_rate: Real, order: i32) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            size,
            cutoff,
            sampling_rate,
            order,
            forward,
            inverse,
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Physical frequency of bin `k`. Bins above `N/2` are the negative
    /// frequencies and take the frequency of their mirror bin.
    pub fn bin_frequency(&self, k: usize) -> Real {
        k.min(self.size - k) as Real * self.sampling_rate / self.size as Real
    }

    pub fn response(&self, k: usize) -> Real {
        butterworth_response(self.bin_frequency(k), self.cutoff, self.order)
    }

    fn spectrum_db(&self, spectrum: &[Complex<Real>]) -> Vec<Real> {
        let norm = (self.size as Real).sqrt();
        spectrum
            .iter()
            .take(self.size / 2)
            .map(|x| (20.0 * (x.norm() / norm).log10()).max(SPECTRUM_FLOOR_DB))
            .collect()
    }

    /// Filters `waveform`, which is zero-padded or truncated to the planned size.
    pub fn apply(&mut self, waveform: &[Real]) -> FilteredWaveform {
        let mut buffer: Vec<Complex<Real>> = waveform
            .iter()
            .map(|&v| Complex::new(v, 0.0))
            .chain(std::iter::repeat(Complex::default()))
            .take(self.size)
            .collect();
        self.forward
            .process_with_scratch(&mut buffer, &mut self.scratch);
        let spectrum_before = self.spectrum_db(&buffer);

        for (k, x) in buffer.iter_mut().enumerate() {
            *x *= self.response(k);
        }
        let spectrum_after = self.spectrum_db(&buffer);

        self.inverse
            .process_with_scratch(&mut buffer, &mut self.scratch);
        let scale = 1.0 / self.size as Real;
        FilteredWaveform {
            samples: buffer.iter().map(|x| x.re * scale).collect(),
            spectrum_before,
            spectrum_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use hrppd_common::SAMPLES_PER_EVENT;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::f64::consts::PI;

    const SAMPLING_RATE: Real = 5e9;

    fn gaussian_pulse() -> Vec<Real> {
        (0..SAMPLES_PER_EVENT)
            .map(|i| -40.0 * (-((i as Real - 520.0) / 12.0).powi(2) / 2.0).exp())
            .collect()
    }

    fn sine(frequency: Real, amplitude: Real) -> Vec<Real> {
        (0..SAMPLES_PER_EVENT)
            .map(|i| amplitude * (2.0 * PI * frequency * i as Real / SAMPLING_RATE).sin())
            .collect()
    }

    fn max_abs_difference(a: &[Real], b: &[Real]) -> Real {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, Real::max)
    }

    #[test]
    fn response_shape() {
        assert_eq!(butterworth_response(0.0, 1e9, 8), 1.0);
        assert_approx_eq!(butterworth_response(1e9, 1e9, 8), 0.5);
        assert!(butterworth_response(2e9, 1e9, 8) < 1e-4);
    }

    #[test]
    fn bin_frequencies_are_mirrored() {
        let filter = LowPassFilter::new(SAMPLES_PER_EVENT, 0.7e9, SAMPLING_RATE);
        assert_eq!(filter.bin_frequency(0), 0.0);
        assert_eq!(filter.bin_frequency(1), filter.bin_frequency(SAMPLES_PER_EVENT - 1));
        assert_eq!(filter.bin_frequency(SAMPLES_PER_EVENT / 2), SAMPLING_RATE / 2.0);
    }

    #[test]
    fn cutoff_at_sampling_rate_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let waveform: Vec<Real> = (0..SAMPLES_PER_EVENT)
            .map(|_| rng.random_range(-50.0..50.0))
            .collect();
        let mut filter = LowPassFilter::new(SAMPLES_PER_EVENT, SAMPLING_RATE, SAMPLING_RATE);
        let filtered = filter.apply(&waveform);
        assert_eq!(filtered.samples.len(), SAMPLES_PER_EVENT);
        assert!(max_abs_difference(&filtered.samples, &waveform) < 1e-2);
    }

    #[test]
    fn cutoff_at_nyquist_keeps_smooth_pulse() {
        let waveform = gaussian_pulse();
        let mut filter = LowPassFilter::new(SAMPLES_PER_EVENT, SAMPLING_RATE / 2.0, SAMPLING_RATE);
        let filtered = filter.apply(&waveform);
        assert!(max_abs_difference(&filtered.samples, &waveform) < 1e-3);
    }

    fn bin_sine(bin: usize, amplitude: Real) -> Vec<Real> {
        sine(bin as Real * SAMPLING_RATE / SAMPLES_PER_EVENT as Real, amplitude)
    }

    #[test]
    fn high_frequency_is_suppressed() {
        let slow = bin_sine(10, 10.0);
        let fast = bin_sine(400, 10.0);
        let waveform: Vec<Real> = slow.iter().zip(&fast).map(|(s, f)| s + f).collect();
        let mut filter = LowPassFilter::new(SAMPLES_PER_EVENT, 0.7e9, SAMPLING_RATE);
        let filtered = filter.apply(&waveform);
        assert!(max_abs_difference(&filtered.samples, &slow) < 1e-3);
    }

    #[test]
    fn spectra_cover_half_the_bins() {
        let mut rng = StdRng::seed_from_u64(11);
        let waveform: Vec<Real> = (0..SAMPLES_PER_EVENT)
            .map(|_| rng.random_range(-5.0..5.0))
            .collect();
        let mut filter = LowPassFilter::new(SAMPLES_PER_EVENT, 0.7e9, SAMPLING_RATE);
        let filtered = filter.apply(&waveform);
        assert_eq!(filtered.spectrum_before.len(), SAMPLES_PER_EVENT / 2);
        assert_eq!(filtered.spectrum_after.len(), SAMPLES_PER_EVENT / 2);
        assert_approx_eq!(filtered.spectrum_before[0], filtered.spectrum_after[0]);
        let last = SAMPLES_PER_EVENT / 2 - 1;
        assert!(filtered.spectrum_after[last] < filtered.spectrum_before[last]);
    }

    #[test]
    fn zero_waveform_stays_zero() {
        let mut filter = LowPassFilter::new(SAMPLES_PER_EVENT, 0.7e9, SAMPLING_RATE);
        let filtered = filter.apply(&vec![0.0; SAMPLES_PER_EVENT]);
        assert!(filtered.samples.iter().all(|&v| v == 0.0));
        assert!(filtered.spectrum_before.iter().all(|&v| v == SPECTRUM_FLOOR_DB));
    }
}
