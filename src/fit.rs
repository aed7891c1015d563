//! Radial model of a phase map.
//!
//! The systematic phase of an etalon is radially symmetric around the optical axis, so the
//! observed map is replaced by a parabola in the distance to the reference pixel. The observed
//! values are wrapped modulo the free spectral range; they are unwrapped along the radius
//! before fitting.

use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use ndarray::{Array2, Zip};

use crate::error::{PipelineError, Result};
use crate::ndarray_utils::{linspace, median};
use crate::phasemap::{PhaseMap, PhaseMapKind};
use crate::polyfit::Parabola;

/// Direction in which the phase grows away from the reference pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Concavity {
    /// The phase increases with the radius.
    Rising,
    /// The phase decreases with the radius.
    Falling,
}

impl Concavity {
    fn sign(&self) -> f64 {
        match self {
            Concavity::Rising => 1.,
            Concavity::Falling => -1.,
        }
    }
}

impl fmt::Display for Concavity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concavity::Rising => f.write_str("rising"),
            Concavity::Falling => f.write_str("falling"),
        }
    }
}

impl FromStr for Concavity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rising" | "+" | "+1" => Ok(Concavity::Rising),
            "falling" | "-" | "-1" => Ok(Concavity::Falling),
            other => Err(PipelineError::InvalidData(format!(
                "unknown concavity `{other}`, expected rising or falling"
            ))),
        }
    }
}

/// Result of [`PhaseMapFitter::fit`].
#[derive(Clone, Debug)]
pub struct FitOutcome {
    /// The model evaluated on every pixel, zero at the reference pixel.
    pub fitted: PhaseMap,
    /// Fitted minus observed map, wrapped into `(-fsr / 2, fsr / 2]`.
    pub residual: PhaseMap,
    /// Concavity used for unwrapping.
    pub concavity: Concavity,
    /// Samples taken from the observed map.
    pub samples: usize,
    /// Samples left after the outlier rejection.
    pub kept: usize,
}

/// Fitter of the radial phase model.
#[derive(Clone, Debug)]
pub struct PhaseMapFitter {
    grid_points: usize,
    percentiles: (f64, f64),
    rounds: usize,
    rejection: f64,
    guard: f64,
    bin_width: f64,
    margin: f64,
    concavity: Option<Concavity>,
}

impl Default for PhaseMapFitter {
    fn default() -> Self {
        Self {
            grid_points: 50,
            percentiles: (5., 95.),
            rounds: 5,
            rejection: 2.,
            guard: 10.,
            bin_width: 2.,
            margin: 0.25,
            concavity: None,
        }
    }
}

impl PhaseMapFitter {
    /// Set the number of samples along each axis (default `50`).
    pub fn with_grid_points(mut self, grid_points: usize) -> Self {
        self.grid_points = grid_points.max(2);
        self
    }

    /// Set the percentile range of each axis that is sampled (default `(5, 95)`).
    pub fn with_percentiles(mut self, low: f64, high: f64) -> Self {
        self.percentiles = (low, high);
        self
    }

    /// Set the number of fit and rejection rounds (default `5`).
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    /// Reject samples further than `rejection` channels from the model (default `2`).
    pub fn with_rejection(mut self, rejection: f64) -> Self {
        self.rejection = rejection;
        self
    }

    /// Set the guard band in spectral units that keeps values near zero from wrapping
    /// (default `10`, at most half the free spectral range).
    pub fn with_guard(mut self, guard: f64) -> Self {
        self.guard = guard;
        self
    }

    /// Set the width in pixels of the radial bins used to detect the concavity (default `2`).
    pub fn with_bin_width(mut self, bin_width: f64) -> Self {
        self.bin_width = bin_width;
        self
    }

    /// Set the fraction by which rising steps must outnumber falling steps, or the reverse,
    /// for the concavity to be trusted (default `0.25`).
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Use the given concavity instead of detecting it.
    pub fn with_concavity(mut self, concavity: Concavity) -> Self {
        self.concavity = Some(concavity);
        self
    }

    /// Fit the radial model to an observed phase map.
    pub fn fit(&self, observed: &PhaseMap) -> Result<FitOutcome> {
        info!("Fitting phase map.");
        let samples = self.samples(observed);
        if samples.len() < 3 {
            return Err(PipelineError::DegenerateFit(format!(
                "phase map: {} valid samples",
                samples.len()
            )));
        }
        let concavity = match self.concavity {
            Some(concavity) => concavity,
            None => self.detect_concavity(&samples, observed.fsr)?,
        };
        debug!("Phase {concavity} with the radius.");

        let radii: Vec<f64> = samples.iter().map(|&(r, _)| r).collect();
        let phases = self.unwrap(&samples, observed.fsr, concavity);
        let (model, kept) = self.fit_rounds(&radii, &phases, observed.sampling.abs())?;
        let model = Parabola::new(model.a, model.b, model.c - model.evaluate(0.));
        info!(
            "Phase map model: {:.6e} r^2 + {:.6e} r, from {kept} of {} samples.",
            model.a,
            model.b,
            samples.len()
        );

        let fitted = self.evaluate(observed, model)?;
        let residual = residual_map(&fitted, observed)?;
        Ok(FitOutcome {
            fitted,
            residual,
            concavity,
            samples: samples.len(),
            kept,
        })
    }

    /// Finite samples of the map on the grid, as `(radius, value)` sorted by radius.
    fn samples(&self, map: &PhaseMap) -> Vec<(f64, f64)> {
        let xs = self.grid(map.width());
        let ys = self.grid(map.height());
        let (rx, ry) = (map.ref_pixel.x as f64, map.ref_pixel.y as f64);
        let mut samples: Vec<(f64, f64)> = ys
            .iter()
            .flat_map(|&y| xs.iter().map(move |&x| (x, y)))
            .map(|(x, y)| {
                let r = (x as f64 - rx).hypot(y as f64 - ry);
                (r, map.value(x, y))
            })
            .filter(|(_, v)| v.is_finite())
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        samples
    }

    fn grid(&self, len: usize) -> Vec<usize> {
        let last = len.saturating_sub(1) as f64;
        let mut positions: Vec<usize> = linspace(
            self.percentiles.0 / 100. * last,
            self.percentiles.1 / 100. * last,
            self.grid_points,
        )
        .into_iter()
        .map(|p| p.round() as usize)
        .collect();
        positions.dedup();
        positions
    }

    /// Sign of the steps between the medians of consecutive radial bins. Steps of half a free
    /// spectral range or more are wraps and do not count.
    fn detect_concavity(&self, samples: &[(f64, f64)], fsr: f64) -> Result<Concavity> {
        let mut medians = Vec::new();
        let mut bin = Vec::new();
        let mut current = None;
        for &(r, v) in samples {
            let index = (r / self.bin_width) as usize;
            if current.is_some_and(|c| c != index) {
                medians.extend(median(bin.drain(..)));
            }
            current = Some(index);
            bin.push(v);
        }
        medians.extend(median(bin));

        let (mut rising, mut falling) = (0, 0);
        for step in medians.windows(2).map(|w| w[1] - w[0]) {
            if step == 0. || step.abs() >= fsr / 2. {
                continue;
            }
            if step > 0. {
                rising += 1;
            } else {
                falling += 1;
            }
        }
        debug!("Radial steps: {rising} rising, {falling} falling.");

        let counted = (rising + falling) as f64;
        if counted == 0. || (rising as f64 - falling as f64).abs() < self.margin * counted {
            return Err(PipelineError::AmbiguousConcavity { rising, falling });
        }
        Ok(if rising > falling {
            Concavity::Rising
        } else {
            Concavity::Falling
        })
    }

    /// Unwrap the sorted samples, choosing for every value the period closest to the running
    /// median of the previous ones. The phase at the reference pixel is zero.
    fn unwrap(&self, samples: &[(f64, f64)], fsr: f64, concavity: Concavity) -> Vec<f64> {
        const WINDOW: usize = 5;
        let sign = concavity.sign();
        let guard = self.guard.min(fsr / 2.);
        let mut unwrapped: Vec<f64> = Vec::with_capacity(samples.len());
        let mut expected = 0.;
        for &(_, value) in samples {
            let base = (sign * value + guard).rem_euclid(fsr) - guard;
            let periods = ((expected - base) / fsr).round();
            unwrapped.push(base + periods * fsr);
            let start = unwrapped.len().saturating_sub(WINDOW);
            expected = median(unwrapped[start..].iter().copied()).unwrap_or(expected);
        }
        unwrapped.into_iter().map(|v| sign * v).collect()
    }

    /// Fit, reject the outliers and refit, until nothing changes or the rounds are spent.
    fn fit_rounds(&self, radii: &[f64], phases: &[f64], step: f64) -> Result<(Parabola, usize)> {
        let limit = self.rejection * step;
        let mut keep = vec![true; radii.len()];
        let mut model = None;
        for round in 0..self.rounds {
            let (x, y): (Vec<f64>, Vec<f64>) = radii
                .iter()
                .zip(phases)
                .zip(&keep)
                .filter(|(_, k)| **k)
                .map(|((&r, &p), _)| (r, p))
                .unzip();
            let Some(fit) = Parabola::fit(&x, &y) else {
                if model.is_some() {
                    warn!("Too few samples left after round {round}, keeping the previous fit.");
                }
                break;
            };
            model = Some(fit);
            let next: Vec<bool> = radii
                .iter()
                .zip(phases)
                .map(|(&r, &p)| (p - fit.evaluate(r)).abs() <= limit)
                .collect();
            if next == keep {
                break;
            }
            debug!(
                "Round {}: {} samples within {limit:.3} of the model.",
                round + 1,
                next.iter().filter(|&&k| k).count()
            );
            keep = next;
        }
        let model = model.ok_or_else(|| {
            PipelineError::DegenerateFit("phase map: samples do not constrain a parabola".to_owned())
        })?;
        Ok((model, keep.iter().filter(|&&k| k).count()))
    }

    fn evaluate(&self, observed: &PhaseMap, model: Parabola) -> Result<PhaseMap> {
        let (rx, ry) = (observed.ref_pixel.x as f64, observed.ref_pixel.y as f64);
        let data = Array2::from_shape_fn((observed.height(), observed.width()), |(y, x)| {
            model.evaluate((x as f64 - rx).hypot(y as f64 - ry))
        });
        let mut fitted = derived_map(observed, data, PhaseMapKind::ParabolaFit)?;
        fitted.zero_at_reference();
        fitted.model = Some(model);
        Ok(fitted)
    }
}

fn derived_map(observed: &PhaseMap, data: Array2<f64>, kind: PhaseMapKind) -> Result<PhaseMap> {
    let mut map = PhaseMap::new(
        data,
        kind,
        observed.ref_pixel,
        observed.fsr,
        observed.sampling,
        observed.units.as_str(),
    )?;
    map.source = observed.source.clone();
    map.calibration_wavelength = observed.calibration_wavelength;
    map.finesse = observed.finesse;
    Ok(map)
}

/// `fitted - observed`, wrapped into `(-fsr / 2, fsr / 2]`.
fn residual_map(fitted: &PhaseMap, observed: &PhaseMap) -> Result<PhaseMap> {
    let fsr = observed.fsr;
    let mut data = Array2::zeros(observed.data.dim());
    Zip::from(&mut data)
        .and(&fitted.data)
        .and(&observed.data)
        .for_each(|r, &f, &o| *r = wrap_centered(f - o, fsr));
    let mut residual = derived_map(observed, data, PhaseMapKind::Residual)?;
    residual.model = fitted.model;
    Ok(residual)
}

fn wrap_centered(value: f64, period: f64) -> f64 {
    value - period * (value / period - 0.5).ceil()
}
