//! Deciding whether a detector waveform holds a real signal.
use crate::{
    conditioning::ConditionedWaveform,
    derived::amplitude,
    parameters::{AnalysisSettings, Polarity, SampleWindow, ToTCounting},
};
use hrppd_common::Real;
use serde::Serialize;

#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalDecision {
    pub valid: bool,
    /// `None` when the window holds no samples.
    pub amplitude: Option<Real>,
    /// Time over threshold in ps.
    pub tot: Real,
    /// Baseline standard deviation.
    pub noise: Real,
    pub threshold: Real,
}

#[derive(Debug, Clone)]
pub struct SignalGate {
    window: SampleWindow,
    polarity: Polarity,
    noise_multiplier: Real,
    min_tot: Real,
    sample_interval: Real,
    counting: ToTCounting,
}

impl SignalGate {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            window: settings.detector.window,
            polarity: settings.detector.polarity,
            noise_multiplier: settings.noise_multiplier,
            min_tot: settings.min_tot,
            sample_interval: settings.sample_interval,
            counting: settings.tot_counting,
        }
    }

    pub fn threshold(&self, noise: Real) -> Real {
        self.noise_multiplier * noise
    }

    /// Number of samples in the window beyond the threshold, counted as configured.
    pub fn tot_bin(&self, waveform: &[Real], noise: Real) -> usize {
        let threshold = self.threshold(noise);
        let beyond = waveform[self.window.clamp(waveform.len())]
            .iter()
            .map(|&value| self.polarity.is_beyond(value, threshold));
        match self.counting {
            ToTCounting::Total => beyond.filter(|&b| b).count(),
            ToTCounting::LongestRun => longest_run(beyond),
        }
    }

    pub fn tot(&self, waveform: &[Real], noise: Real) -> Real {
        self.tot_bin(waveform, noise) as Real * self.sample_interval
    }

    pub fn decide(&self, waveform: &ConditionedWaveform) -> SignalDecision {
        let noise = waveform.noise_std_dev();
        let threshold = self.threshold(noise);
        let amplitude = amplitude(waveform, self.window, self.polarity);
        let tot = self.tot(waveform, noise);
        SignalDecision {
            valid: amplitude.is_some_and(|amplitude| amplitude > threshold) && tot > self.min_tot,
            amplitude,
            tot,
            noise,
            threshold,
        }
    }
}

fn longest_run(flags: impl Iterator<Item = bool>) -> usize {
    flags
        .fold((0, 0), |(run, longest), flag| {
            let run = if flag { run + 1 } else { 0 };
            (run, usize::max(longest, run))
        })
        .1
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrppd_common::{BASELINE_SAMPLES, SAMPLES_PER_EVENT};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn gate(settings: AnalysisSettings) -> SignalGate {
        SignalGate::new(&settings)
    }

    fn noisy(seed: u64) -> Vec<Real> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..SAMPLES_PER_EVENT)
            .map(|_| rng.random_range(-1.5..1.5))
            .collect()
    }

    /// Adds a pulse of `width` samples at 530 with a linear rise and fall.
    fn with_pulse(mut waveform: Vec<Real>, depth: Real, width: usize) -> Vec<Real> {
        let half = width as Real / 2.0;
        for i in 0..width {
            let edge = 1.0 - ((i as Real + 0.5) - half).abs() / half;
            waveform[530 + i] -= depth * edge;
        }
        waveform
    }

    #[test]
    fn all_zero_waveform_is_not_a_signal() {
        let decision = gate(Default::default())
            .decide(&ConditionedWaveform::from(vec![0.0; SAMPLES_PER_EVENT]));
        assert_eq!(decision.noise, 0.0);
        assert_eq!(decision.tot, 0.0);
        assert_eq!(decision.amplitude, Some(0.0));
        assert!(!decision.valid);
    }

    #[test]
    fn wide_pulse_is_a_signal() {
        let waveform = ConditionedWaveform::from(with_pulse(noisy(1), 50.0, 30));
        let decision = gate(Default::default()).decide(&waveform);
        assert!(decision.noise > 0.5 && decision.noise < 1.0);
        assert!(decision.amplitude.unwrap() > 40.0);
        assert!(decision.tot > 800.0);
        assert!(decision.valid);
    }

    #[test]
    fn narrow_pulse_fails_tot_cut() {
        let mut waveform = vec![0.0; SAMPLES_PER_EVENT];
        for (i, v) in waveform.iter_mut().take(BASELINE_SAMPLES).enumerate() {
            *v = if i % 2 == 0 { 1.0 } else { -1.0 };
        }
        waveform[550..554].copy_from_slice(&[-30.0, -60.0, -30.0, -2.0]);
        let decision = gate(Default::default()).decide(&ConditionedWaveform::from(waveform));
        assert_eq!(decision.amplitude, Some(60.0));
        assert_eq!(decision.tot, 600.0);
        assert!(!decision.valid);
    }

    #[test]
    fn tot_grows_as_threshold_falls() {
        for seed in 0..10 {
            let waveform = with_pulse(noisy(seed), 12.0, 40);
            let noise = crate::conditioning::noise_std_dev(&waveform);
            let tots: Vec<Real> = [8.0, 6.0, 4.0, 3.0, 2.0, 1.0, 0.5, 0.0]
                .into_iter()
                .map(|noise_multiplier| {
                    gate(AnalysisSettings {
                        noise_multiplier,
                        ..Default::default()
                    })
                    .tot(&waveform, noise)
                })
                .collect();
            assert!(tots.windows(2).all(|pair| pair[0] <= pair[1]), "{tots:?}");
        }
    }

    #[test]
    fn longest_run_counts_contiguous_samples() {
        let mut waveform = vec![0.0; SAMPLES_PER_EVENT];
        waveform[510..513].fill(-10.0);
        waveform[520..527].fill(-10.0);

        let total = gate(Default::default());
        let longest = gate(AnalysisSettings {
            tot_counting: ToTCounting::LongestRun,
            ..Default::default()
        });
        assert_eq!(total.tot_bin(&waveform, 1.0), 10);
        assert_eq!(longest.tot_bin(&waveform, 1.0), 7);
        assert_eq!(longest.tot(&waveform, 1.0), 1400.0);
    }

    #[test]
    fn positive_polarity_counts_samples_above() {
        let mut settings = AnalysisSettings::default();
        settings.detector.polarity = Polarity::Positive;
        let mut waveform = vec![0.0; SAMPLES_PER_EVENT];
        waveform[510..516].fill(10.0);
        waveform[530..540].fill(-10.0);
        assert_eq!(gate(settings).tot_bin(&waveform, 1.0), 6);
    }
}
