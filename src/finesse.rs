//! Line width and finesse of the reference spectrum.
//!
//! The primary result is the geometric FWHM, measured on the interpolated spectrum. Gaussian
//! and Lorentzian profile fits are kept for diagnostics; the one with the smaller residual
//! tells the line shape.

use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1, s};

use crate::error::{PipelineError, Result};
use crate::fsr::FreeSpectralRange;
use crate::lm::{Gaussian, LMConfig, LMModel, Lorentzian, optimize};
use crate::ndarray_utils::{argmax, correlate_same, percentile, roll};
use crate::spline::CubicSpline;

/// Shape of a fitted line profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineProfile {
    /// `A exp(-(x - mu)^2 / 2 sigma^2) + B`.
    Gaussian,
    /// `A / (1 + ((x - mu) / gamma)^2) + B`.
    Lorentzian,
}

/// A fitted line profile, in channels of the reference spectrum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProfileFit {
    /// Profile shape.
    pub shape: LineProfile,
    /// Peak height above the background.
    pub amplitude: f64,
    /// Line center.
    pub center: f64,
    /// Full width at half maximum.
    pub fwhm: f64,
    /// Constant background.
    pub background: f64,
    /// Root mean square of the residuals.
    pub rms: f64,
}

/// Result of the finesse measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct FinesseEstimate {
    /// Geometric FWHM in spectral units.
    pub fwhm: f64,
    /// Geometric FWHM in channels.
    pub fwhm_channels: f64,
    /// Free spectral range over FWHM, both in spectral units.
    pub finesse: f64,
    /// Channel of the line in the first free spectral range.
    pub peak_channel: f64,
    /// Gaussian fit, if it converged.
    pub gaussian: Option<ProfileFit>,
    /// Lorentzian fit, if it converged.
    pub lorentzian: Option<ProfileFit>,
}

impl FinesseEstimate {
    /// The fitted profile with the smaller residual.
    pub fn best_fit(&self) -> Option<&ProfileFit> {
        match (&self.gaussian, &self.lorentzian) {
            (Some(g), Some(l)) => Some(if l.rms < g.rms { l } else { g }),
            (g, l) => g.as_ref().or(l.as_ref()),
        }
    }
}

/// Estimator of the line width and finesse.
#[derive(Clone, Debug)]
pub struct FinesseEstimator {
    clip_percentile: f64,
    kernel_width: f64,
    kernel_power: f64,
    oversample: usize,
}

impl Default for FinesseEstimator {
    fn default() -> Self {
        Self {
            clip_percentile: 50.,
            kernel_width: 1.5,
            kernel_power: 4.,
            oversample: 10,
        }
    }
}

impl FinesseEstimator {
    /// Set the percentile below which the spectrum is clipped for the peak search
    /// (default `50`).
    pub fn with_clip_percentile(mut self, clip_percentile: f64) -> Self {
        self.clip_percentile = clip_percentile;
        self
    }

    /// Set the half width in channels and the exponent of the generalized Gaussian used to
    /// locate the peak (default `1.5` and `4`).
    pub fn with_kernel(mut self, width: f64, power: f64) -> Self {
        self.kernel_width = width;
        self.kernel_power = power;
        self
    }

    /// Set the points per channel of the interpolated spectrum (default `10`).
    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }

    fn kernel(&self) -> Array1<f64> {
        let half = (3. * self.kernel_width).ceil() as usize;
        Array1::from_shape_fn(2 * half + 1, |i| {
            let x = (i as f64 - half as f64) / self.kernel_width;
            (-x.abs().powf(self.kernel_power)).exp()
        })
    }

    /// Measure the FWHM of the dominant line within the first free spectral range of
    /// `spectrum`, and the finesse `fsr / fwhm`.
    pub fn estimate(
        &self,
        spectrum: ArrayView1<'_, f64>,
        fsr: FreeSpectralRange,
        sampling: f64,
    ) -> Result<FinesseEstimate> {
        let period = fsr.channels.min(spectrum.len());
        if period < 3 {
            return Err(PipelineError::InsufficientFsr {
                channels: period,
                minimum: 3,
            });
        }
        let window = spectrum
            .slice(s![..period])
            .mapv(|v| if v.is_finite() { v } else { 0. });

        // center the line in the window so it does not touch the edges
        let brightest = argmax(window.view())
            .ok_or_else(|| PipelineError::DegenerateFit("empty reference spectrum".to_owned()))?;
        let shift = (period / 2) as isize - brightest as isize;
        let window = roll(window.view(), shift);

        let floor = percentile(window.iter().copied(), self.clip_percentile).unwrap_or(0.);
        let clipped = window.mapv(|v| (v - floor).max(0.));
        let correlated = correlate_same(clipped.view(), self.kernel().view());
        let peak = argmax(correlated.view()).unwrap_or(period / 2);
        debug!("Line peak at channel {peak} of the centered window.");

        let (left, right, center) = self.half_maximum_crossings(window.view(), peak)?;
        let fwhm_channels = right - left;
        let fwhm = fwhm_channels * sampling.abs();
        let finesse = fsr.value / fwhm;

        let x: Vec<f64> = (0..period).map(|i| i as f64).collect();
        let y = window.to_vec();
        let background = window.iter().copied().fold(f64::INFINITY, f64::min);
        let amplitude = window[peak] - background;
        let gaussian = fit_profile(
            &Gaussian,
            LineProfile::Gaussian,
            &x,
            &y,
            [amplitude, center, fwhm_channels / 2.3548, background],
        );
        let lorentzian = fit_profile(
            &Lorentzian,
            LineProfile::Lorentzian,
            &x,
            &y,
            [amplitude, center, fwhm_channels / 2., background],
        );

        let estimate = FinesseEstimate {
            fwhm,
            fwhm_channels,
            finesse,
            peak_channel: (center - shift as f64).rem_euclid(period as f64),
            gaussian,
            lorentzian,
        };
        if let Some(best) = estimate.best_fit() {
            debug!(
                "{:?} profile fits best, FWHM {:.3} channels, rms {:.3e}.",
                best.shape, best.fwhm, best.rms
            );
        } else {
            warn!("Neither a Gaussian nor a Lorentzian profile could be fitted.");
        }
        info!("FWHM {fwhm:.4}, finesse {finesse:.3}.");

        if finesse <= 1. {
            return Err(PipelineError::UnphysicalFinesse(finesse));
        }
        Ok(estimate)
    }

    /// Left and right half maximum crossings and the position of the interpolated maximum,
    /// in channels. The background is the minimum of the window.
    fn half_maximum_crossings(
        &self,
        window: ArrayView1<'_, f64>,
        peak: usize,
    ) -> Result<(f64, f64, f64)> {
        let y = window.to_vec();
        let spline = CubicSpline::uniform(&y)
            .ok_or_else(|| PipelineError::DegenerateFit("reference spectrum too short".to_owned()))?;
        let step = 1. / self.oversample as f64;
        let fine: Vec<f64> = (0..=(y.len() - 1) * self.oversample)
            .map(|j| spline.evaluate(j as f64 * step))
            .collect();

        // the interpolated maximum within one channel of the located peak
        let lo = peak.saturating_sub(1) * self.oversample;
        let hi = ((peak + 1) * self.oversample).min(fine.len() - 1);
        let top = (lo..=hi)
            .max_by(|&a, &b| fine[a].total_cmp(&fine[b]))
            .unwrap_or(peak * self.oversample);
        let background = y.iter().copied().fold(f64::INFINITY, f64::min);
        let half = background + (fine[top] - background) / 2.;

        let no_crossing =
            || PipelineError::DegenerateFit("line does not drop to half maximum".to_owned());
        let mut j = top;
        while fine[j] >= half {
            j = j.checked_sub(1).ok_or_else(no_crossing)?;
        }
        let left = j as f64 + (half - fine[j]) / (fine[j + 1] - fine[j]);
        let mut j = top;
        while fine[j] >= half {
            j += 1;
            if j == fine.len() {
                return Err(no_crossing());
            }
        }
        let right = (j - 1) as f64 + (fine[j - 1] - half) / (fine[j - 1] - fine[j]);

        Ok((left * step, right * step, top as f64 * step))
    }
}

fn fit_profile<M: LMModel<4>>(
    model: &M,
    shape: LineProfile,
    x: &[f64],
    y: &[f64],
    initial: [f64; 4],
) -> Option<ProfileFit> {
    let result = optimize(model, x, y, initial, &LMConfig::default());
    if !result.converged || result.params.iter().any(|p| !p.is_finite()) {
        return None;
    }
    let [amplitude, center, width, background] = result.params;
    let fwhm = match shape {
        LineProfile::Gaussian => 2. * (2. * 2f64.ln()).sqrt() * width,
        LineProfile::Lorentzian => 2. * width,
    };
    Some(ProfileFit {
        shape,
        amplitude,
        center,
        fwhm,
        background,
        rms: (result.chi2 / x.len() as f64).sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    use super::*;
    use crate::synthetic::AiryCube;

    #[test]
    fn airy_finesse() {
        let model = AiryCube::default();
        let spectrum = Array1::from_shape_fn(48, |k| model.profile(k as f64 - 10.3));
        let fsr = FreeSpectralRange {
            value: 48.,
            channels: 24,
        };
        let estimate = FinesseEstimator::default()
            .estimate(spectrum.view(), fsr, 2.)
            .unwrap();

        // pi sqrt(F) / 2 for F = 20
        assert!(estimate.finesse > 6. && estimate.finesse < 8.5, "{}", estimate.finesse);
        assert_abs_diff_eq!(estimate.fwhm, 2. * estimate.fwhm_channels);
        assert_abs_diff_eq!(estimate.peak_channel, 10.3, epsilon = 0.2);
    }

    #[test]
    fn gaussian_line() {
        let sigma = 1.5;
        let spectrum = Array1::from_shape_fn(30, |k| {
            0.2 + (-(k as f64 - 21.4).powi(2) / (2. * sigma * sigma)).exp()
        });
        let fsr = FreeSpectralRange {
            value: 30.,
            channels: 30,
        };
        let estimate = FinesseEstimator::default()
            .estimate(spectrum.view(), fsr, 1.)
            .unwrap();

        let expected = 2.3548 * sigma;
        assert_abs_diff_eq!(estimate.fwhm_channels, expected, epsilon = 0.1);
        assert_abs_diff_eq!(estimate.peak_channel, 21.4, epsilon = 0.1);
        let best = estimate.best_fit().unwrap();
        assert_eq!(best.shape, LineProfile::Gaussian);
        assert_abs_diff_eq!(best.fwhm, expected, epsilon = 1e-3);
    }

    #[test]
    fn line_wider_than_fsr_is_unphysical() {
        let model = AiryCube::default();
        let spectrum = Array1::from_shape_fn(24, |k| model.profile(k as f64 - 10.3));
        let fsr = FreeSpectralRange {
            value: 2.,
            channels: 24,
        };
        assert!(matches!(
            FinesseEstimator::default().estimate(spectrum.view(), fsr, 1.),
            Err(PipelineError::UnphysicalFinesse(_))
        ));
    }

    #[test]
    fn flat_spectrum_has_no_width() {
        let fsr = FreeSpectralRange {
            value: 12.,
            channels: 12,
        };
        assert!(matches!(
            FinesseEstimator::default().estimate(Array1::<f64>::ones(12).view(), fsr, 1.),
            Err(PipelineError::DegenerateFit(_))
        ));
    }
}
