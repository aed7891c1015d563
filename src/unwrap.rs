//! Removal of free-spectral-range wraps from sequences of peak positions.
//!
//! A peak that drifts past the end of the scanned range reappears one free spectral range
//! earlier. Along a sorted set of samples this shows up as a jump of about one FSR.

use itertools::Itertools;

/// Remove the wraps of an ordered sequence.
///
/// Every step larger than `fsr / 2` in magnitude is taken as a wrap and the nearest multiple of
/// `fsr` is subtracted from all following values. NaN entries are kept and skipped. Applying
/// it to a sequence without such steps returns the sequence unchanged.
pub fn unwrap_fsr(values: &[f64], fsr: f64) -> Vec<f64> {
    let mut offset = 0.;
    let mut previous: Option<f64> = None;
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return v;
            }
            if let Some(prev) = previous {
                let step = v - prev;
                if step.abs() > fsr / 2. {
                    offset -= (step / fsr).round() * fsr;
                }
            }
            previous = Some(v);
            v + offset
        })
        .collect()
}

/// Sort the samples by position, then unwrap the values.
///
/// Returns the sorted positions with their unwrapped values.
pub fn unwrap_by_position(positions: &[f64], values: &[f64], fsr: f64) -> (Vec<f64>, Vec<f64>) {
    let (positions, sorted): (Vec<f64>, Vec<f64>) = positions
        .iter()
        .copied()
        .zip(values.iter().copied())
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
        .unzip();
    let unwrapped = unwrap_fsr(&sorted, fsr);
    (positions, unwrapped)
}
