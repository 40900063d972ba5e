//! Constant-fraction discrimination.
//!
//! The waveform is delayed and compared against an attenuated copy of itself.
//! The resulting signal crosses zero at a time which does not depend on the
//! pulse amplitude. The crossing is located between samples by fitting a
//! cubic spline to the signal around the leading edge and bisecting it.
use crate::{
    parameters::{ChannelTimingParameters, Polarity, SampleWindow},
    spline::CubicSpline,
};
use hrppd_common::{Real, metrics::failures::FailureKind};
use std::ops::Range;
use thiserror::Error;

/// Fewest sample intervals the spline is fitted over.
const MIN_FIT_SPAN: usize = 5;
/// Sample intervals after the search bound fitted for positive pulses.
const POSITIVE_FIT_SPAN: usize = 10;
/// How far before the extremum the fit starts when the search finds no bound.
const FALLBACK_SPAN: usize = 10;
/// Bisection stops once the bracket is narrower than this, in ps.
const BISECTION_TOLERANCE: Real = 1e-3;
const MAX_BISECTIONS: usize = 50;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CfdError {
    #[error("Search window {0} holds no samples")]
    EmptyWindow(SampleWindow),
    #[error("No zero crossing between samples {fit_low} and {fit_high}")]
    NoCrossing { fit_low: usize, fit_high: usize },
}

impl CfdError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CfdError::EmptyWindow(_) => FailureKind::EmptySearchWindow,
            CfdError::NoCrossing { .. } => FailureKind::NoZeroCrossing,
        }
    }
}

/// `cfd[i] = w[i - delay] - fraction·w[i]`, where samples before the start count as zero.
pub fn cfd_signal(waveform: &[Real], fraction: Real, delay: usize) -> Vec<Real> {
    waveform
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let delayed = i.checked_sub(delay).map_or(0.0, |j| waveform[j]);
            delayed - fraction * value
        })
        .collect()
}

/// Everything worked out on the way to a crossing time.
#[derive(Debug, Clone, PartialEq)]
pub struct CfdAnalysis {
    pub signal: Vec<Real>,
    pub sample_interval: Real,
    pub window: Range<usize>,
    /// The extremum the crossing is searched from.
    pub bin_low: usize,
    /// The extremum the crossing is searched towards.
    pub bin_high: usize,
    pub fit_low: usize,
    pub fit_high: usize,
    pub spline: CubicSpline,
    /// The sample after which the signal changes sign.
    pub crossing_bin: usize,
    /// In ps.
    pub crossing: Real,
}

impl CfdAnalysis {
    pub fn sample_time(&self, index: usize) -> Real {
        sample_time(index, self.sample_interval)
    }

    /// The spline evaluated at `steps + 1` evenly spaced times across the fit range.
    pub fn spline_curve(&self, steps: usize) -> Vec<(Real, Real)> {
        let (start, end) = self.spline.domain();
        let steps = steps.max(1);
        (0..=steps)
            .map(|step| {
                let t = start + (end - start) * step as Real / steps as Real;
                (t, self.spline.eval(t))
            })
            .collect()
    }
}

fn sample_time(index: usize, sample_interval: Real) -> Real {
    (index as Real + 0.5) * sample_interval
}

#[derive(Debug, Clone)]
pub struct CfdDiscriminator {
    parameters: ChannelTimingParameters,
    sample_interval: Real,
}

impl CfdDiscriminator {
    pub fn new(parameters: &ChannelTimingParameters, sample_interval: Real) -> Self {
        Self {
            parameters: parameters.clone(),
            sample_interval,
        }
    }

    pub fn parameters(&self) -> &ChannelTimingParameters {
        &self.parameters
    }

    pub fn crossing_time(&self, waveform: &[Real]) -> Result<Real, CfdError> {
        self.analyse(waveform).map(|analysis| analysis.crossing)
    }

    pub fn analyse(&self, waveform: &[Real]) -> Result<CfdAnalysis, CfdError> {
        let polarity = self.parameters.polarity;
        let signal = cfd_signal(waveform, self.parameters.fraction, self.parameters.delay);
        let window = self.parameters.window.clamp(signal.len());
        let (argmin, argmax) = extrema(&signal, window.clone())
            .ok_or(CfdError::EmptyWindow(self.parameters.window))?;
        let (bin_low, bin_high) = match polarity {
            Polarity::Positive => (argmin, argmax),
            Polarity::Negative => (argmax, argmin),
        };

        let bound = search_bound(&signal, bin_low, bin_high, polarity);
        let (fit_low, fit_high) = fit_range(bound, bin_high, polarity, signal.len());
        let no_crossing = CfdError::NoCrossing { fit_low, fit_high };

        let crossing_bin = (fit_low..fit_high)
            .find(|&i| crosses(polarity, signal[i], signal[i + 1]))
            .ok_or_else(|| no_crossing.clone())?;
        let spline = CubicSpline::new(
            (fit_low..=fit_high)
                .map(|i| sample_time(i, self.sample_interval))
                .collect(),
            signal[fit_low..=fit_high].to_vec(),
        )
        .ok_or(no_crossing)?;
        let crossing = bisect(
            &spline,
            sample_time(crossing_bin, self.sample_interval),
            sample_time(crossing_bin + 1, self.sample_interval) + BISECTION_TOLERANCE,
        );

        Ok(CfdAnalysis {
            signal,
            sample_interval: self.sample_interval,
            window,
            bin_low,
            bin_high,
            fit_low,
            fit_high,
            spline,
            crossing_bin,
            crossing,
        })
    }
}

/// First positions of the minimum and the maximum within `window`.
fn extrema(signal: &[Real], mut window: Range<usize>) -> Option<(usize, usize)> {
    let first = window.next()?;
    Some(window.fold((first, first), |(min, max), i| {
        (
            if signal[i] < signal[min] { i } else { min },
            if signal[i] > signal[max] { i } else { max },
        )
    }))
}

/// Whether the signal has yet to cross zero in the direction of the pulse.
fn before_crossing(polarity: Polarity, value: Real) -> bool {
    match polarity {
        Polarity::Positive => value <= 0.0,
        Polarity::Negative => value >= 0.0,
    }
}

fn crosses(polarity: Polarity, value: Real, next: Real) -> bool {
    match polarity {
        Polarity::Positive => value <= 0.0 && next > 0.0,
        Polarity::Negative => value >= 0.0 && next < 0.0,
    }
}

/// The sample the fit starts from.
///
/// Positive pulses scan forward from the minimum, up to the maximum, for the first sample
/// at or below zero. Negative pulses walk back from the minimum towards the maximum to the
/// last sample at or above zero.
fn search_bound(signal: &[Real], bin_low: usize, bin_high: usize, polarity: Polarity) -> usize {
    let found = match polarity {
        Polarity::Positive => {
            let end = if bin_low <= bin_high {
                bin_high + 1
            } else {
                signal.len()
            };
            (bin_low..end).find(|&i| before_crossing(polarity, signal[i]))
        }
        Polarity::Negative if bin_low <= bin_high => (bin_low..=bin_high)
            .rev()
            .find(|&i| before_crossing(polarity, signal[i])),
        Polarity::Negative => {
            (bin_high..=bin_low).find(|&i| before_crossing(polarity, signal[i]))
        }
    };
    found.unwrap_or_else(|| bin_high.saturating_sub(FALLBACK_SPAN).max(1))
}

/// Inclusive range of samples the spline is fitted through, always within the signal.
fn fit_range(bound: usize, bin_high: usize, polarity: Polarity, len: usize) -> (usize, usize) {
    let last = len.saturating_sub(1);
    let (low, high) = match polarity {
        Polarity::Positive => (bound, bound + POSITIVE_FIT_SPAN),
        Polarity::Negative => (bound, bin_high),
    };
    let (mut low, mut high) = if high < low { (high, low) } else { (low, high) };
    high = high.min(last);
    low = low.min(high);

    let span = high - low;
    if span < MIN_FIT_SPAN {
        let needed = MIN_FIT_SPAN - span;
        low = low.saturating_sub(needed.div_ceil(2));
        high = (high + needed / 2).min(last);
        if high - low < MIN_FIT_SPAN {
            // Near either end of the signal the widening has to go one way.
            low = high.saturating_sub(MIN_FIT_SPAN);
            high = (low + MIN_FIT_SPAN).min(last);
        }
    }
    (low, high)
}

/// Bisects `spline` on `[low, high]`, returning the lower end of the final bracket,
/// or the point at which the spline is exactly zero if one is met.
fn bisect(spline: &CubicSpline, mut low: Real, mut high: Real) -> Real {
    let mut value_low = spline.eval(low);
    if value_low == 0.0 {
        return low;
    }
    for _ in 0..MAX_BISECTIONS {
        if high - low < BISECTION_TOLERANCE {
            break;
        }
        let mid = (low + high) / 2.0;
        let value_mid = spline.eval(mid);
        if value_mid == 0.0 {
            return mid;
        }
        if value_low * value_mid < 0.0 {
            high = mid;
        } else {
            low = mid;
            value_low = value_mid;
        }
    }
    low
}
