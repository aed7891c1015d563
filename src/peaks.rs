//! Robust search of the dominant emission peak in a single spectrum.

use ndarray::{Array1, ArrayView1};

use crate::ndarray_utils::{local_maxima, median};

/// Which candidate wins if several local maxima survive the threshold.
///
/// Spectra spanning more than one free spectral range show the same line several times.
/// The choice decides which replica is reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// The candidate at the smallest channel index.
    #[default]
    Earliest,
    /// The brightest candidate; equal brightness resolves to the earliest channel.
    Highest,
}

/// Finds the channel of the dominant peak of a spectrum.
///
/// The median is subtracted as noise floor, everything below `threshold` times the maximum is
/// set to zero, and local maxima at least `separation * N / 2` channels apart are collected.
#[derive(Clone, Debug)]
pub struct PeakFinder {
    threshold: f64,
    separation: f64,
    tie_break: TieBreak,
}

impl Default for PeakFinder {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            separation: 0.2,
            tie_break: TieBreak::Earliest,
        }
    }
}

impl PeakFinder {
    /// Set the threshold as fraction of the maximum (default `0.7`).
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the width of the peak window as fraction of the spectrum length (default `0.2`).
    pub fn with_separation(mut self, separation: f64) -> Self {
        self.separation = separation;
        self
    }

    /// Set the tie-break rule.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Number of neighbours on each side a peak must exceed.
    pub fn order(&self, len: usize) -> usize {
        ((self.separation * len as f64 / 2.).round() as usize).max(1)
    }

    /// Channel index of the dominant peak, or `None` if nothing survives the threshold.
    pub fn find(&self, spectrum: ArrayView1<'_, f64>) -> Option<usize> {
        let floor = median(spectrum.iter().copied())?;
        let centered = spectrum.mapv(|v| v - floor);
        let max = centered
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if max <= 0. {
            return None;
        }
        let cut = self.threshold * max;
        let thresholded: Array1<f64> = centered.mapv(|v| if v < cut { 0. } else { v });

        let candidates = local_maxima(thresholded.view(), self.order(spectrum.len()));
        match self.tie_break {
            TieBreak::Earliest => candidates.first().copied(),
            TieBreak::Highest => candidates
                .iter()
                .copied()
                .reduce(|best, i| if thresholded[i] > thresholded[best] { i } else { best }),
        }
    }
}
