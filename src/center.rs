//! Iterative search of the center of the interference rings.
//!
//! Along any straight line through the image, the channel of the line peak grows with the
//! squared distance to the ring center, so it traces a parabola whose vertex is the projection
//! of the center onto that line. Starting from the image center, a vertical line yields the
//! row and a horizontal line yields the column of the next estimate.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::cube::Cube;
use crate::error::{PipelineError, Result};
use crate::fsr::MIN_FSR_CHANNELS;
use crate::header::{Header, keys};
use crate::ndarray_utils::{linspace, median};
use crate::peaks::PeakFinder;
use crate::polyfit::Parabola;
use crate::unwrap::unwrap_by_position;
use crate::wcs::AxisWcs;

/// What to do if the center did not converge within the iteration budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonConvergencePolicy {
    /// Return the last estimate, flagged as not converged.
    AcceptLast,
    /// Raise [`PipelineError::ConvergenceFailure`].
    #[default]
    Fail,
}

/// The reference pixel of a phase map, 0-based `(column, row)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefPixel {
    /// Column.
    pub x: usize,
    /// Row.
    pub y: usize,
}

impl RefPixel {
    /// Create a new instance.
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Read `PHMREFX`/`PHMREFY`. Both must be present and non-negative.
    pub fn from_header(header: &Header) -> Option<Self> {
        let x = header.get_i64(keys::PHMREFX)?;
        let y = header.get_i64(keys::PHMREFY)?;
        Some(Self::new(usize::try_from(x).ok()?, usize::try_from(y).ok()?))
    }

    /// Write `PHMREFX`/`PHMREFY`.
    pub fn write_header(&self, header: &mut Header) {
        header.set(keys::PHMREFX, self.x);
        header.set(keys::PHMREFY, self.y);
    }
}

/// Result of the ring center search.
#[derive(Clone, Debug, PartialEq)]
pub struct RingCenter {
    /// Column of the center, 0-based pixels.
    pub x: f64,
    /// Row of the center, 0-based pixels.
    pub y: f64,
    /// Iterations spent.
    pub iterations: usize,
    /// Whether the last step was within the tolerance.
    pub converged: bool,
    /// Center in world coordinates, if the cube carries a spatial calibration.
    pub world: Option<(f64, f64)>,
}

impl RingCenter {
    /// Nearest pixel.
    pub fn ref_pixel(&self) -> RefPixel {
        RefPixel::new(
            self.x.round().max(0.) as usize,
            self.y.round().max(0.) as usize,
        )
    }
}

/// Estimator of the ring center.
#[derive(Clone, Debug)]
pub struct RingCenterLocator {
    max_iterations: usize,
    tolerance: f64,
    samples: usize,
    percentiles: (f64, f64),
    min_rejection: f64,
    peak_finder: PeakFinder,
    policy: NonConvergencePolicy,
    initial: Option<(f64, f64)>,
}

impl Default for RingCenterLocator {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 2.,
            samples: 500,
            percentiles: (5., 95.),
            min_rejection: 1.,
            peak_finder: PeakFinder::default(),
            policy: NonConvergencePolicy::default(),
            initial: None,
        }
    }
}

impl RingCenterLocator {
    /// Set the iteration budget (default `20`).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence tolerance in pixels (default `2`).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the maximum number of samples per line (default `500`).
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Set the percentile range of each axis that is sampled (default `(5, 95)`).
    pub fn with_percentiles(mut self, low: f64, high: f64) -> Self {
        self.percentiles = (low, high);
        self
    }

    /// Set the peak finder used on every sampled spectrum.
    pub fn with_peak_finder(mut self, peak_finder: PeakFinder) -> Self {
        self.peak_finder = peak_finder;
        self
    }

    /// Set the non-convergence policy.
    pub fn with_policy(mut self, policy: NonConvergencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start from `(x, y)` instead of the image center.
    pub fn with_initial_center(mut self, x: f64, y: f64) -> Self {
        self.initial = Some((x, y));
        self
    }

    /// Reference pixel stored in the header, or the located ring center if there is none.
    pub fn resolve(&self, cube: &Cube, fsr_channels: usize) -> Result<RefPixel> {
        if let Some(ref_pixel) = RefPixel::from_header(cube.header()) {
            info!(
                "Using reference pixel ({}, {}) from header.",
                ref_pixel.x, ref_pixel.y
            );
            return Ok(ref_pixel);
        }
        Ok(self.locate(cube, fsr_channels)?.ref_pixel())
    }

    /// Locate the ring center of a cube whose free spectral range spans `fsr_channels`.
    pub fn locate(&self, cube: &Cube, fsr_channels: usize) -> Result<RingCenter> {
        self.locate_with(cube, fsr_channels, |spaxels| {
            spaxels
                .iter()
                .map(|&(x, y)| self.peak_finder.find(cube.spectrum(x, y)))
                .collect()
        })
    }

    fn locate_with<P>(&self, cube: &Cube, fsr_channels: usize, peaks: P) -> Result<RingCenter>
    where
        P: Fn(&[(usize, usize)]) -> Vec<Option<usize>>,
    {
        if fsr_channels < MIN_FSR_CHANNELS {
            return Err(PipelineError::InsufficientFsr {
                channels: fsr_channels,
                minimum: MIN_FSR_CHANNELS,
            });
        }
        let fsr = fsr_channels as f64;
        let (width, height) = (cube.width(), cube.height());
        let (mut cx, mut cy) = self
            .initial
            .unwrap_or(((width - 1) as f64 / 2., (height - 1) as f64 / 2.));
        let mut rows = self.sample_positions(height);
        let mut columns = self.sample_positions(width);

        info!("Locating ring center.");
        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            iterations += 1;

            let column = clamp_index(cx, width);
            let spaxels: Vec<(usize, usize)> = rows.iter().map(|&y| (column, y)).collect();
            let new_y = self.vertex(&mut rows, &peaks(&spaxels), fsr)?;

            let row = clamp_index(cy, height);
            let spaxels: Vec<(usize, usize)> = columns.iter().map(|&x| (x, row)).collect();
            let new_x = self.vertex(&mut columns, &peaks(&spaxels), fsr)?;

            debug!("Iteration {iterations}: center ({new_x:.2}, {new_y:.2}).");
            let step = (new_x - cx).abs().max((new_y - cy).abs());
            cx = new_x;
            cy = new_y;
            if step <= self.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            info!("Ring center at ({cx:.2}, {cy:.2}) after {iterations} iterations.");
        } else {
            match self.policy {
                NonConvergencePolicy::Fail => {
                    return Err(PipelineError::ConvergenceFailure {
                        stage: "ring center search",
                        iterations,
                    });
                }
                NonConvergencePolicy::AcceptLast => warn!(
                    "Ring center did not converge in {iterations} iterations, using last estimate ({cx:.2}, {cy:.2})."
                ),
            }
        }

        Ok(RingCenter {
            x: cx,
            y: cy,
            iterations,
            converged,
            world: world_position(cube.header(), cx, cy),
        })
    }

    /// Unique integer positions spread over the configured percentile range of an axis.
    fn sample_positions(&self, len: usize) -> Vec<usize> {
        let last = (len - 1) as f64;
        let low = self.percentiles.0 / 100. * last;
        let high = self.percentiles.1 / 100. * last;
        let n = self.samples.min((high - low) as usize + 1);
        let mut positions: Vec<usize> = linspace(low, high, n)
            .into_iter()
            .map(|p| p.round() as usize)
            .collect();
        positions.dedup();
        positions
    }

    /// Vertex of the parabola traced by the peaks along one line.
    /// Samples rejected as outliers are removed from `positions` for the next iterations.
    fn vertex(&self, positions: &mut Vec<usize>, peaks: &[Option<usize>], fsr: f64) -> Result<f64> {
        let (found, channels): (Vec<f64>, Vec<f64>) = positions
            .iter()
            .zip(peaks)
            .filter_map(|(&p, peak)| peak.map(|k| (p as f64, k as f64)))
            .unzip();
        let (found, channels) = unwrap_by_position(&found, &channels, fsr);
        let degenerate = || {
            PipelineError::DegenerateFit(format!(
                "ring center: no parabola through {} peaks along a sampled line",
                found.len()
            ))
        };
        let fit = Parabola::fit(&found, &channels).ok_or_else(degenerate)?;

        let steps = channels.windows(2).map(|w| (w[1] - w[0]).abs());
        let limit = (3. * median(steps).unwrap_or(0.)).max(self.min_rejection);
        let (kept, rejected): (Vec<(f64, f64)>, Vec<(f64, f64)>) = found
            .iter()
            .copied()
            .zip(channels.iter().copied())
            .partition(|&(p, k)| (k - fit.evaluate(p)).abs() <= limit);

        let fit = if rejected.is_empty() {
            fit
        } else {
            debug!("Rejected {} of {} samples.", rejected.len(), found.len());
            let rejected: HashSet<usize> = rejected.iter().map(|&(p, _)| p as usize).collect();
            positions.retain(|p| !rejected.contains(p));
            let (x, y): (Vec<f64>, Vec<f64>) = kept.into_iter().unzip();
            Parabola::fit(&x, &y).unwrap_or(fit)
        };

        fit.vertex()
            .filter(|v| v.is_finite())
            .ok_or_else(degenerate)
    }
}

fn clamp_index(position: f64, len: usize) -> usize {
    position.round().clamp(0., (len - 1) as f64) as usize
}

fn world_position(header: &Header, x: f64, y: f64) -> Option<(f64, f64)> {
    let axis_x = AxisWcs::from_header(header, 1)?;
    let axis_y = AxisWcs::from_header(header, 2)?;
    Some((axis_x.pixel_to_world(x), axis_y.pixel_to_world(y)))
}

#[cfg(feature = "parallel")]
mod parallel {
    use rayon::prelude::*;

    use super::*;

    impl RingCenterLocator {
        /// Locate the ring center, searching the peaks of every line in parallel.
        ///
        /// Also see [`locate`](RingCenterLocator::locate()) for more details.
        pub fn locate_par(&self, cube: &Cube, fsr_channels: usize) -> Result<RingCenter> {
            self.locate_with(cube, fsr_channels, |spaxels| {
                spaxels
                    .par_iter()
                    .map(|&(x, y)| self.peak_finder.find(cube.spectrum(x, y)))
                    .collect()
            })
        }
    }
}
