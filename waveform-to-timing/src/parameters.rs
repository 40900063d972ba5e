use anyhow::{Error, anyhow};
use clap::Parser;
use hrppd_common::{Channel, Real};
use serde::Serialize;
use std::{fmt::Display, ops::Range, str::FromStr};
use strum::{EnumString, IntoStaticStr};
use thiserror::Error;

/// Half-open range of sample indices `[min, max)`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleWindow {
    pub min: usize,
    pub max: usize,
}

impl SampleWindow {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// The indices of the window that exist in a waveform of `len` samples.
    pub fn clamp(&self, len: usize) -> Range<usize> {
        let max = self.max.min(len);
        self.min.min(max)..max
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }
}

impl FromStr for SampleWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vals: Vec<_> = s.split(',').map(str::trim).collect();
        if let [min, max] = vals.as_slice() {
            Ok(SampleWindow {
                min: usize::from_str(min)?,
                max: usize::from_str(max)?,
            })
        } else {
            Err(anyhow!(
                "Incorrect number of parameters in window, expected pattern '*,*', got '{s}'"
            ))
        }
    }
}

impl Display for SampleWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{})", self.min, self.max)
    }
}

/// Sign of the pulses expected on a channel.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    #[default]
    Negative,
}

impl Polarity {
    /// Whether `value` lies past `threshold` in the direction of the pulse.
    /// `threshold` is a magnitude.
    pub fn is_beyond(self, value: Real, threshold: Real) -> bool {
        match self {
            Polarity::Positive => value > threshold,
            Polarity::Negative => value < -threshold,
        }
    }
}

/// How samples beyond threshold are turned into a time-over-threshold.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ToTCounting {
    /// Every sample of the window beyond threshold counts.
    #[default]
    Total,
    /// Only the longest contiguous run of samples beyond threshold counts.
    LongestRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTimingParameters {
    pub fraction: Real,
    pub delay: usize,
    pub window: SampleWindow,
    pub polarity: Polarity,
}

/// Everything the analysis stages need, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSettings {
    /// Detector channel analysed against the trigger.
    pub channel: Channel,
    /// mV per ADC count.
    pub calibration: Real,
    /// Picoseconds between samples.
    pub sample_interval: Real,
    /// Hz.
    pub sampling_rate: Real,
    pub trigger: ChannelTimingParameters,
    pub detector: ChannelTimingParameters,
    /// Hz.
    pub fft_cutoff: Real,
    pub apply_filter: bool,
    pub tot_counting: ToTCounting,
    pub noise_multiplier: Real,
    /// Picoseconds.
    pub min_tot: Real,
    /// Number of valid events whose CFD analysis is kept for diagnostics.
    pub diagnostic_events: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            channel: 0,
            calibration: 0.48828125,
            sample_interval: 200.0,
            sampling_rate: 5e9,
            trigger: ChannelTimingParameters {
                fraction: 0.5,
                delay: 3,
                window: SampleWindow::new(200, 300),
                polarity: Polarity::Positive,
            },
            detector: ChannelTimingParameters {
                fraction: 0.5,
                delay: 3,
                window: SampleWindow::new(500, 600),
                polarity: Polarity::Negative,
            },
            fft_cutoff: 0.7e9,
            apply_filter: false,
            tot_counting: ToTCounting::Total,
            noise_multiplier: 4.0,
            min_tot: 800.0,
            diagnostic_events: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("CFD fraction of the {0} must lie in (0,1], got {1}")]
    Fraction(&'static str, Real),
    #[error("Window {1} of the {0} is empty")]
    EmptyWindow(&'static str, SampleWindow),
    #[error("{0} must be positive, got {1}")]
    NotPositive(&'static str, Real),
}

impl AnalysisSettings {
    /// Time at the centre of sample `index`, in picoseconds.
    pub fn sample_time(&self, index: usize) -> Real {
        (index as Real + 0.5) * self.sample_interval
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, parameters) in [("trigger", &self.trigger), ("detector", &self.detector)] {
            if !(parameters.fraction > 0.0 && parameters.fraction <= 1.0) {
                return Err(SettingsError::Fraction(name, parameters.fraction));
            }
            if parameters.window.is_empty() {
                return Err(SettingsError::EmptyWindow(name, parameters.window));
            }
        }
        for (name, value) in [
            ("Sample interval", self.sample_interval),
            ("Sampling rate", self.sampling_rate),
            ("FFT cutoff", self.fft_cutoff),
        ] {
            if value <= 0.0 {
                return Err(SettingsError::NotPositive(name, value));
            }
        }
        Ok(())
    }
}

/// The analysis settings as taken from the command line or environment.
#[derive(Debug, Clone, Parser)]
pub struct AnalysisOptions {
    /// Detector channel to analyse
    #[clap(long, env, default_value = "0")]
    pub channel: Channel,

    /// ADC to mV conversion constant
    #[clap(long, env, default_value = "0.48828125")]
    pub calibration: Real,

    /// Sampling interval in picoseconds
    #[clap(long, env, default_value = "200")]
    pub sample_interval: Real,

    /// Sampling rate in Hz
    #[clap(long, env, default_value = "5e9")]
    pub sampling_rate: Real,

    #[clap(long, env, default_value = "0.5")]
    pub trigger_cfd_fraction: Real,

    #[clap(long, env, default_value = "3")]
    pub trigger_cfd_delay: usize,

    /// Trigger search window, as 'min,max' sample indices
    #[clap(long, env, default_value = "200,300")]
    pub trigger_window: SampleWindow,

    #[clap(long, env, default_value = "positive")]
    pub trigger_polarity: Polarity,

    #[clap(long, env, default_value = "0.5")]
    pub detector_cfd_fraction: Real,

    #[clap(long, env, default_value = "3")]
    pub detector_cfd_delay: usize,

    /// Detector search window, as 'min,max' sample indices
    #[clap(long, env, default_value = "500,600")]
    pub detector_window: SampleWindow,

    #[clap(long, env, default_value = "negative")]
    pub detector_polarity: Polarity,

    /// Low-pass filter cutoff in Hz
    #[clap(long, env, default_value = "0.7e9")]
    pub fft_cutoff: Real,

    /// Low-pass filter valid detector waveforms
    #[clap(long, env)]
    pub apply_filter: bool,

    /// One of 'total' or 'longest-run'
    #[clap(long, env, default_value = "total")]
    pub tot_counting: ToTCounting,

    /// Signal threshold in units of the baseline noise
    #[clap(long, env, default_value = "4")]
    pub noise_multiplier: Real,

    /// Minimum time-over-threshold of a valid signal, in picoseconds
    #[clap(long, env, default_value = "800")]
    pub min_tot: Real,
}

impl AnalysisOptions {
    pub fn to_settings(&self, diagnostic_events: usize) -> AnalysisSettings {
        AnalysisSettings {
            channel: self.channel,
            calibration: self.calibration,
            sample_interval: self.sample_interval,
            sampling_rate: self.sampling_rate,
            trigger: ChannelTimingParameters {
                fraction: self.trigger_cfd_fraction,
                delay: self.trigger_cfd_delay,
                window: self.trigger_window,
                polarity: self.trigger_polarity,
            },
            detector: ChannelTimingParameters {
                fraction: self.detector_cfd_fraction,
                delay: self.detector_cfd_delay,
                window: self.detector_window,
                polarity: self.detector_polarity,
            },
            fft_cutoff: self.fft_cutoff,
            apply_filter: self.apply_filter,
            tot_counting: self.tot_counting,
            noise_multiplier: self.noise_multiplier,
            min_tot: self.min_tot,
            diagnostic_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_from_str() {
        assert_eq!(
            SampleWindow::from_str("500,600").unwrap(),
            SampleWindow::new(500, 600)
        );
        assert_eq!(
            SampleWindow::from_str(" 3, 9").unwrap(),
            SampleWindow::new(3, 9)
        );
        assert!(SampleWindow::from_str("500").is_err());
        assert!(SampleWindow::from_str("1,2,3").is_err());
        assert!(SampleWindow::from_str("a,2").is_err());
    }

    #[test]
    fn window_clamp() {
        assert_eq!(SampleWindow::new(500, 600).clamp(1024), 500..600);
        assert_eq!(SampleWindow::new(1000, 1100).clamp(1024), 1000..1024);
        assert!(SampleWindow::new(2000, 2100).clamp(1024).is_empty());
        assert!(SampleWindow::new(10, 5).clamp(1024).is_empty());
    }

    #[test]
    fn enums_from_str() {
        assert_eq!(Polarity::from_str("positive").unwrap(), Polarity::Positive);
        assert_eq!(Polarity::from_str("negative").unwrap(), Polarity::Negative);
        assert_eq!(
            ToTCounting::from_str("longest-run").unwrap(),
            ToTCounting::LongestRun
        );
        assert!(ToTCounting::from_str("sometimes").is_err());
    }

    #[test]
    fn command_line_defaults_match_settings_defaults() {
        let options = AnalysisOptions::parse_from(["waveform-to-timing"]);
        assert_eq!(options.to_settings(0), AnalysisSettings::default());
    }

    #[test]
    fn command_line_overrides() {
        let options = AnalysisOptions::parse_from([
            "waveform-to-timing",
            "--channel",
            "7",
            "--detector-window",
            "400,450",
            "--detector-polarity",
            "positive",
            "--tot-counting",
            "longest-run",
            "--apply-filter",
        ]);
        let settings = options.to_settings(5);
        assert_eq!(settings.channel, 7);
        assert_eq!(settings.detector.window, SampleWindow::new(400, 450));
        assert_eq!(settings.detector.polarity, Polarity::Positive);
        assert_eq!(settings.tot_counting, ToTCounting::LongestRun);
        assert!(settings.apply_filter);
        assert_eq!(settings.diagnostic_events, 5);
    }

    #[test]
    fn validation() {
        assert_eq!(AnalysisSettings::default().validate(), Ok(()));

        let mut settings = AnalysisSettings::default();
        settings.trigger.fraction = 0.0;
        assert_eq!(
            settings.validate(),
            Err(SettingsError::Fraction("trigger", 0.0))
        );

        let mut settings = AnalysisSettings::default();
        settings.detector.window = SampleWindow::new(600, 600);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::EmptyWindow("detector", _))
        ));

        let mut settings = AnalysisSettings::default();
        settings.sample_interval = -1.0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::NotPositive(..))
        ));
    }

    #[test]
    fn sample_times_are_bin_centres() {
        let settings = AnalysisSettings::default();
        assert_eq!(settings.sample_time(0), 100.0);
        assert_eq!(settings.sample_time(510), 102100.0);
    }
}
