//! Synthetic scanning Fabry-Perot cubes with a known ring geometry.
//!
//! Every spaxel sees the Airy function
//! `I(k) = 1 / (1 + F sin^2(pi (k - k0 - alpha r^2) / P))`,
//! with `r` the distance to the ring center and `P` the free spectral range in channels.
//! The line therefore moves by `alpha r^2` channels between the center and radius `r`.

use ndarray::Array3;

use crate::cube::Cube;
use crate::error::Result;
use crate::header::{Header, keys};

/// Builder of synthetic Airy cubes.
#[derive(Clone, Debug)]
pub struct AiryCube {
    width: usize,
    height: usize,
    depth: usize,
    period: f64,
    coefficient: f64,
    center: (f64, f64),
    line_channel: f64,
    curvature: f64,
    sampling: f64,
    continuum: f64,
}

impl Default for AiryCube {
    fn default() -> Self {
        Self {
            width: 120,
            height: 120,
            depth: 48,
            period: 24.,
            coefficient: 20.,
            center: (55.3, 67.8),
            line_channel: 10.3,
            curvature: 0.0066,
            sampling: 1.,
            continuum: 0.,
        }
    }
}

impl AiryCube {
    /// Set the cube shape as `(width, height, depth)`.
    pub fn with_shape(mut self, width: usize, height: usize, depth: usize) -> Self {
        self.width = width;
        self.height = height;
        self.depth = depth;
        self
    }

    /// Set the free spectral range in channels.
    pub fn with_period(mut self, period: f64) -> Self {
        self.period = period;
        self
    }

    /// Set the coefficient of finesse `F`.
    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = coefficient;
        self
    }

    /// Set the ring center as `(x, y)` in 0-based pixels.
    pub fn with_center(mut self, x: f64, y: f64) -> Self {
        self.center = (x, y);
        self
    }

    /// Set the channel of the line at the ring center.
    pub fn with_line_channel(mut self, channel: f64) -> Self {
        self.line_channel = channel;
        self
    }

    /// Set the channel shift per squared pixel of radius. Negative values flip the concavity.
    pub fn with_curvature(mut self, curvature: f64) -> Self {
        self.curvature = curvature;
        self
    }

    /// Set the signed spectral increment per channel written to `CDELT3`.
    pub fn with_sampling(mut self, sampling: f64) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set a constant offset added to every sample.
    pub fn with_continuum(mut self, continuum: f64) -> Self {
        self.continuum = continuum;
        self
    }

    /// Channel shift of the line at pixel `(x, y)` relative to the ring center, unwrapped.
    pub fn phase_channels(&self, x: f64, y: f64) -> f64 {
        let r2 = (x - self.center.0).powi(2) + (y - self.center.1).powi(2);
        self.curvature * r2
    }

    /// Normalized Airy profile at a (fractional) channel distance from the line.
    pub fn profile(&self, offset: f64) -> f64 {
        let s = (std::f64::consts::PI * offset / self.period).sin();
        1. / (1. + self.coefficient * s * s)
    }

    /// Render the cube. The header carries a linear spectral calibration in `bcv`.
    pub fn build(&self) -> Result<Cube> {
        let data = Array3::from_shape_fn((self.depth, self.height, self.width), |(k, y, x)| {
            let line = self.line_channel + self.phase_channels(x as f64, y as f64);
            self.continuum + self.profile(k as f64 - line)
        });
        let mut header = Header::new();
        header.set(keys::CRPIX3, 1.);
        header.set(keys::CRVAL3, 0.);
        header.set(keys::CDELT3, self.sampling);
        header.set(keys::CUNIT3, "bcv");
        Cube::new(data, header)
    }
}
