//! Measurement of the free spectral range from the periodicity of the data.
//!
//! Every channel image is compared with the first one. The spatially averaged absolute
//! difference drops back towards zero once the scan has advanced by one free spectral range.

use log::{debug, info};
use ndarray::{Array1, Axis, Zip};

use crate::cube::Cube;
use crate::error::{PipelineError, Result};
use crate::ndarray_utils::local_minima;
use crate::spline::CubicSpline;

/// Fewest channels per free spectral range a phase map can be measured on.
pub const MIN_FSR_CHANNELS: usize = 5;

/// Periodicity of the etalon response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FreeSpectralRange {
    /// Free spectral range in the units of the spectral axis, always positive.
    pub value: f64,
    /// Channels in one free spectral range; channels `[0, channels)` cover one period.
    pub channels: usize,
}

impl FreeSpectralRange {
    /// Free spectral range given in spectral units, converted with the channel `sampling`.
    pub fn from_value(value: f64, sampling: f64) -> Result<Self> {
        let value = value.abs();
        let channels = (value / sampling.abs()).round();
        if !channels.is_finite() {
            return Err(PipelineError::InvalidData(format!(
                "free spectral range {value} with sampling {sampling}"
            )));
        }
        let fsr = Self {
            value,
            channels: channels as usize,
        };
        fsr.validate()?;
        Ok(fsr)
    }

    /// Err if the period is too short to extract a phase map.
    pub fn validate(&self) -> Result<()> {
        if self.channels < MIN_FSR_CHANNELS {
            return Err(PipelineError::InsufficientFsr {
                channels: self.channels,
                minimum: MIN_FSR_CHANNELS,
            });
        }
        Ok(())
    }
}

/// Estimator of the free spectral range.
#[derive(Clone, Debug)]
pub struct FsrEstimator {
    oversample: usize,
    min_offset: usize,
}

impl Default for FsrEstimator {
    fn default() -> Self {
        Self {
            oversample: 10,
            min_offset: 2,
        }
    }
}

impl FsrEstimator {
    /// Set the resolution of the interpolated difference curve, in points per channel
    /// (default `10`).
    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }

    /// Set the channels after the first one in which no minimum is accepted (default `2`).
    pub fn with_min_offset(mut self, min_offset: usize) -> Self {
        self.min_offset = min_offset;
        self
    }

    /// Mean absolute difference of every channel image to the first one.
    pub fn difference_curve(&self, cube: &Cube) -> Array1<f64> {
        let data = cube.data();
        let first = cube.channel(0);
        let n = (cube.width() * cube.height()) as f64;
        data.axis_iter(Axis(0))
            .map(|channel| {
                let mut sum = 0.;
                Zip::from(&channel).and(&first).for_each(|a, b| {
                    let d = (a - b).abs();
                    if d.is_finite() {
                        sum += d;
                    }
                });
                sum / n
            })
            .collect()
    }

    /// Measure the free spectral range of a cube.
    pub fn estimate(&self, cube: &Cube) -> Result<FreeSpectralRange> {
        if cube.depth() < MIN_FSR_CHANNELS {
            return Err(PipelineError::InsufficientFsr {
                channels: cube.depth(),
                minimum: MIN_FSR_CHANNELS,
            });
        }
        info!("Measuring free spectral range.");
        let curve = self.difference_curve(cube).to_vec();
        let spline = CubicSpline::uniform(&curve).ok_or(PipelineError::FsrUndetermined)?;

        let points = (cube.depth() - 1) * self.oversample + 1;
        let fine = Array1::from_shape_fn(points, |j| {
            spline.evaluate(j as f64 / self.oversample as f64)
        });
        let first_eligible = self.min_offset * self.oversample;
        let minimum = local_minima(fine.view(), 1)
            .into_iter()
            .find(|&j| j >= first_eligible)
            .ok_or(PipelineError::FsrUndetermined)?;
        if minimum == first_eligible {
            return Err(PipelineError::FsrUndetermined);
        }

        let position = minimum as f64 / self.oversample as f64;
        let fsr = FreeSpectralRange {
            value: position * cube.sampling().abs(),
            channels: position.round() as usize,
        };
        debug!("First minimum of the difference curve at channel {position:.2}.");
        info!(
            "Free spectral range: {:.4} {} ({} channels).",
            fsr.value,
            cube.units(),
            fsr.channels
        );
        fsr.validate()?;
        Ok(fsr)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use ndarray::Array3;

    use super::*;
    use crate::header::{Header, keys};
    use crate::synthetic::AiryCube;

    fn sinusoid_cube(period: usize, periods: usize) -> Cube {
        let data = Array3::from_shape_fn((period * periods, 8, 9), |(k, y, x)| {
            let phase = 0.37 * x as f64 + 0.91 * y as f64;
            2. + (2. * PI * k as f64 / period as f64 + phase).cos()
        });
        let mut header = Header::new();
        header.set(keys::CDELT3, -0.5);
        Cube::new(data, header).unwrap()
    }

    #[test]
    fn sinusoid_period() {
        for period in [7, 12, 19] {
            let fsr = FsrEstimator::default()
                .estimate(&sinusoid_cube(period, 3))
                .unwrap();
            assert!(
                fsr.channels.abs_diff(period) <= 1,
                "period {period}, measured {}",
                fsr.channels
            );
            assert!((fsr.value - 0.5 * period as f64).abs() <= 0.5);
        }
    }

    #[test]
    fn airy_cube_period() {
        let cube = AiryCube::default().build().unwrap();
        let fsr = FsrEstimator::default().estimate(&cube).unwrap();
        assert!(fsr.channels.abs_diff(24) <= 1);
    }

    #[test]
    fn monotonic_curve_is_undetermined() {
        let data = Array3::from_shape_fn((10, 2, 2), |(k, _, _)| k as f64);
        let cube = Cube::new(data, Header::new()).unwrap();
        assert!(matches!(
            FsrEstimator::default().estimate(&cube),
            Err(PipelineError::FsrUndetermined)
        ));
    }

    #[test]
    fn explicit_value() {
        let fsr = FreeSpectralRange::from_value(-36., 1.5).unwrap();
        assert_eq!(fsr.channels, 24);
        assert_eq!(fsr.value, 36.);
        assert!(matches!(
            FreeSpectralRange::from_value(6., 1.5),
            Err(PipelineError::InsufficientFsr { channels: 4, .. })
        ));
    }
}
