//! Quantities derived from a conditioned waveform besides its timing.
use crate::parameters::{Polarity, SampleWindow};
use hrppd_common::Real;

/// Samples either side of the peak that are integrated for the charge.
const CHARGE_HALF_WIDTH: usize = 5;
/// Samples from the peak searched for the overshoot.
const OVERSHOOT_SPAN: usize = 10;
/// Input impedance of the digitiser in Ω.
const INPUT_IMPEDANCE: Real = 50.0;
const ELEMENTARY_CHARGE: Real = 1.6e-19;
const FEMTO: Real = 1e-15;

/// Index of the first sample of the window furthest in the direction of the pulse.
pub fn peak_index(waveform: &[Real], window: SampleWindow, polarity: Polarity) -> Option<usize> {
    let mut window = window.clamp(waveform.len());
    let first = window.next()?;
    Some(window.fold(first, |peak, i| {
        let further = match polarity {
            Polarity::Positive => waveform[i] > waveform[peak],
            Polarity::Negative => waveform[i] < waveform[peak],
        };
        if further { i } else { peak }
    }))
}

/// Height of the pulse in the window, as a magnitude.
pub fn amplitude(waveform: &[Real], window: SampleWindow, polarity: Polarity) -> Option<Real> {
    let peak = peak_index(waveform, window, polarity)?;
    Some(match polarity {
        Polarity::Positive => waveform[peak],
        Polarity::Negative => waveform[peak].abs(),
    })
}

/// The swing back past the baseline after the peak: the extreme of the
/// samples starting at the peak, in the direction opposite to the pulse.
pub fn overshoot(waveform: &[Real], window: SampleWindow, polarity: Polarity) -> Option<Real> {
    let peak = peak_index(waveform, window, polarity)?;
    let following = waveform.iter().skip(peak).take(OVERSHOOT_SPAN).copied();
    match polarity {
        Polarity::Positive => following.reduce(Real::min),
        Polarity::Negative => following.reduce(Real::max),
    }
}

/// Estimated number of photoelectrons in a negative pulse.
///
/// The negative samples within five samples of the minimum are integrated, in mV·ps,
/// and converted to a charge in fC across the input impedance.
pub fn npe(waveform: &[Real], window: SampleWindow, sample_interval: Real) -> Option<Real> {
    let peak = peak_index(waveform, window, Polarity::Negative)?;
    let start = peak.saturating_sub(CHARGE_HALF_WIDTH);
    let end = (peak + CHARGE_HALF_WIDTH).min(waveform.len());
    let integral: Real = waveform[start..end].iter().filter(|&&v| v < 0.0).sum();
    let charge = -integral * sample_interval / INPUT_IMPEDANCE;
    Some(charge * FEMTO / ELEMENTARY_CHARGE)
}

pub fn timing_difference(trigger: Option<Real>, channel: Option<Real>) -> Option<Real> {
    Some(channel? - trigger?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn pulse() -> Vec<Real> {
        let mut waveform = vec![0.0; 64];
        waveform[20..26].copy_from_slice(&[-2.0, -10.0, -20.0, -10.0, 1.5, 3.0]);
        waveform[28] = 2.0;
        waveform
    }

    #[test]
    fn peak_and_amplitude() {
        let window = SampleWindow::new(10, 40);
        assert_eq!(peak_index(&pulse(), window, Polarity::Negative), Some(22));
        assert_eq!(amplitude(&pulse(), window, Polarity::Negative), Some(20.0));
        assert_eq!(peak_index(&pulse(), window, Polarity::Positive), Some(25));
        assert_eq!(amplitude(&pulse(), window, Polarity::Positive), Some(3.0));
    }

    #[test]
    fn first_of_equal_peaks() {
        let waveform = [0.0, -5.0, 0.0, -5.0];
        assert_eq!(
            peak_index(&waveform, SampleWindow::new(0, 4), Polarity::Negative),
            Some(1)
        );
    }

    #[test]
    fn empty_window_has_nothing() {
        let window = SampleWindow::new(100, 200);
        assert_eq!(amplitude(&pulse(), window, Polarity::Negative), None);
        assert_eq!(overshoot(&pulse(), window, Polarity::Negative), None);
        assert_eq!(npe(&pulse(), window, 200.0), None);
    }

    #[test]
    fn overshoot_after_peak() {
        let window = SampleWindow::new(10, 40);
        assert_eq!(overshoot(&pulse(), window, Polarity::Negative), Some(3.0));
        // Sample 32 is the eleventh from the peak.
        let mut waveform = pulse();
        waveform[32] = 9.0;
        assert_eq!(overshoot(&waveform, window, Polarity::Negative), Some(3.0));
    }

    #[test]
    fn overshoot_at_end_of_waveform() {
        let waveform = [0.0, 0.0, -4.0, -1.0];
        assert_eq!(
            overshoot(&waveform, SampleWindow::new(0, 4), Polarity::Negative),
            Some(-1.0)
        );
    }

    #[test]
    fn npe_of_known_charge() {
        // -42 mV·sample over 200 ps into 50 Ω is 168 fC.
        let expected = 168.0 * 1e-15 / 1.6e-19;
        assert_approx_eq!(
            npe(&pulse(), SampleWindow::new(10, 40), 200.0).unwrap(),
            expected,
            1e-3
        );
    }

    #[test]
    fn npe_near_start_of_waveform() {
        let waveform = [-1.0, -3.0, -1.0, 0.0, 0.0, 0.0, 0.0, -7.0];
        // The peak is at 1, so sample 7 is outside the integral.
        let expected = 5.0 * 200.0 / 50.0 * 1e-15 / 1.6e-19;
        assert_approx_eq!(
            npe(&waveform, SampleWindow::new(0, 3), 200.0).unwrap(),
            expected,
            1e-3
        );
    }

    #[test]
    fn difference_needs_both_times() {
        assert_eq!(timing_difference(Some(100.0), Some(350.0)), Some(250.0));
        assert_eq!(timing_difference(None, Some(350.0)), None);
        assert_eq!(timing_difference(Some(100.0), None), None);
    }
}
