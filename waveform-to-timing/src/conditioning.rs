//! Pedestal subtraction, calibration and baseline noise.
use crate::parameters::AnalysisSettings;
use hrppd_common::{BASELINE_SAMPLES, Real, Sample};
use std::ops::Deref;

fn baseline<T>(waveform: &[T]) -> &[T] {
    &waveform[..waveform.len().min(BASELINE_SAMPLES)]
}

fn mean(values: impl ExactSizeIterator<Item = Real>) -> Real {
    let len = values.len();
    if len == 0 {
        0.0
    } else {
        values.sum::<Real>() / len as Real
    }
}

/// Population standard deviation of the baseline samples.
pub fn noise_std_dev(waveform: &[Real]) -> Real {
    let baseline = baseline(waveform);
    let mean = mean(baseline.iter().copied());
    mean_of_squares(baseline.iter().map(|&v| v - mean)).sqrt()
}

fn mean_of_squares(deviations: impl ExactSizeIterator<Item = Real>) -> Real {
    mean(deviations.map(|d| d * d))
}

/// A waveform in mV with its pedestal removed.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ConditionedWaveform(Vec<Real>);

impl ConditionedWaveform {
    pub fn noise_std_dev(&self) -> Real {
        noise_std_dev(&self.0)
    }

    pub fn into_inner(self) -> Vec<Real> {
        self.0
    }
}

impl From<Vec<Real>> for ConditionedWaveform {
    fn from(samples: Vec<Real>) -> Self {
        Self(samples)
    }
}

impl Deref for ConditionedWaveform {
    type Target = [Real];

    fn deref(&self) -> &[Real] {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct Conditioner {
    calibration: Real,
}

impl Conditioner {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            calibration: settings.calibration,
        }
    }

    pub fn correct(&self, raw: &[Sample]) -> ConditionedWaveform {
        let pedestal = mean(baseline(raw).iter().map(|&v| Real::from(v)));
        ConditionedWaveform(
            raw.iter()
                .map(|&v| (Real::from(v) - pedestal) * self.calibration)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use hrppd_common::SAMPLES_PER_EVENT;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn noisy_raw(seed: u64, offset: Sample) -> Vec<Sample> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..SAMPLES_PER_EVENT)
            .map(|_| offset + rng.random_range(-3.0..3.0))
            .collect()
    }

    fn conditioner(calibration: Real) -> Conditioner {
        Conditioner::new(&AnalysisSettings {
            calibration,
            ..Default::default()
        })
    }

    #[test]
    fn baseline_mean_is_zero() {
        for seed in 0..5 {
            let corrected = conditioner(0.48828125).correct(&noisy_raw(seed, 8000.0));
            assert_eq!(corrected.len(), SAMPLES_PER_EVENT);
            assert_approx_eq!(mean(corrected[..BASELINE_SAMPLES].iter().copied()), 0.0, 1e-9);
        }
    }

    #[test]
    fn calibration_scales_about_pedestal() {
        let mut raw = vec![10.0; SAMPLES_PER_EVENT];
        raw[600] = 14.0;
        let corrected = conditioner(0.5).correct(&raw);
        assert_eq!(corrected[0], 0.0);
        assert_eq!(corrected[600], 2.0);
    }

    #[test]
    fn noise_ignores_constant_offset() {
        let raw = noisy_raw(17, 0.0);
        let corrected = conditioner(1.0).correct(&raw);
        let shifted: Vec<Real> = corrected
            .iter()
            .enumerate()
            .map(|(i, &v)| if i < BASELINE_SAMPLES { v + 123.0 } else { v })
            .collect();
        assert!(corrected.noise_std_dev() > 0.0);
        assert_approx_eq!(noise_std_dev(&shifted), corrected.noise_std_dev(), 1e-9);
    }

    #[test]
    fn noise_is_population_std_dev() {
        let mut waveform = vec![0.0; SAMPLES_PER_EVENT];
        for (i, v) in waveform.iter_mut().take(BASELINE_SAMPLES).enumerate() {
            *v = if i % 2 == 0 { 2.0 } else { -2.0 };
        }
        // Samples after the baseline play no part.
        waveform[500] = -1000.0;
        assert_approx_eq!(noise_std_dev(&waveform), 2.0);
    }

    #[test]
    fn all_zero_waveform() {
        let corrected = conditioner(0.48828125).correct(&vec![0.0; SAMPLES_PER_EVENT]);
        assert!(corrected.iter().all(|&v| v == 0.0));
        assert_eq!(corrected.noise_std_dev(), 0.0);
    }

    #[test]
    fn short_and_empty_waveforms() {
        assert_eq!(noise_std_dev(&[]), 0.0);
        let corrected = conditioner(1.0).correct(&[1.0, 3.0]);
        assert_eq!(corrected.into_inner(), vec![-1.0, 1.0]);
    }
}
