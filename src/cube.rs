//! The scanning data-cube: intensities indexed `(channel, row, column)` plus header.

use log::debug;
use ndarray::{Array1, Array3, ArrayView1, ArrayView2, Axis, s};

use crate::error::{PipelineError, Result};
use crate::header::{Header, keys};
use crate::ndarray_utils::{argmax, percentile, roll};
use crate::wcs::AxisWcs;

/// Spectral unit used when the header carries no `CUNIT3`.
pub const DEFAULT_UNIT: &str = "channels";

/// A 3D data-cube with its calibration header.
#[derive(Clone, Debug)]
pub struct Cube {
    data: Array3<f64>,
    header: Header,
}

impl Cube {
    /// Wrap an array of shape `(depth, height, width)`.
    /// The `NAXISn` cards are overwritten with the array shape.
    pub fn new(data: Array3<f64>, mut header: Header) -> Result<Self> {
        let (depth, height, width) = data.dim();
        if depth == 0 || height == 0 || width == 0 {
            return Err(PipelineError::DimensionMismatch(format!(
                "cube has an empty axis: {depth} x {height} x {width}"
            )));
        }
        header.set(keys::NAXIS1, width);
        header.set(keys::NAXIS2, height);
        header.set(keys::NAXIS3, depth);
        Ok(Self { data, header })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    /// Number of channels.
    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    /// Intensities, `(channel, row, column)`.
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Header cards.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable header cards.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Split into the raw parts.
    pub fn into_parts(self) -> (Array3<f64>, Header) {
        (self.data, self.header)
    }

    /// Linear calibration of the spectral axis; channel indices if the header has none.
    pub fn spectral_axis(&self) -> AxisWcs {
        AxisWcs::from_header(&self.header, 3).unwrap_or_else(AxisWcs::identity)
    }

    /// Physical value of every channel.
    pub fn z(&self) -> Array1<f64> {
        let axis = self.spectral_axis();
        Array1::from_shape_fn(self.depth(), |k| axis.pixel_to_world(k as f64))
    }

    /// Signed spectral increment per channel.
    pub fn sampling(&self) -> f64 {
        self.spectral_axis().cdelt
    }

    /// Unit of the spectral axis.
    pub fn units(&self) -> &str {
        self.header.get_str(keys::CUNIT3).unwrap_or(DEFAULT_UNIT)
    }

    /// Spectrum of the spaxel at column `x`, row `y`.
    pub fn spectrum(&self, x: usize, y: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![.., y, x])
    }

    /// Image of one channel.
    pub fn channel(&self, k: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), k)
    }

    /// Spatially averaged spectrum.
    pub fn collapse(&self) -> Array1<f64> {
        let n = (self.width() * self.height()) as f64;
        Array1::from_shape_fn(self.depth(), |k| {
            self.channel(k).iter().filter(|v| v.is_finite()).sum::<f64>() / n
        })
    }

    /// Channel of the line in the collapsed spectrum. Samples below the 75th percentile are
    /// ignored so that a broad continuum does not move the peak.
    pub fn line_channel(&self) -> Option<usize> {
        let collapsed = self.collapse();
        let floor = percentile(collapsed.iter().copied(), 75.)?;
        let clipped = collapsed.mapv(|v| if v > floor { v } else { 0. });
        argmax(clipped.view())
    }

    /// Keep the channels `[n_begin, n_end)`, where a non-positive `n_end` counts from the end
    /// like a python slice. `CRPIX3` moves with the cut so the calibration stays valid.
    pub fn zcut(&self, n_begin: usize, n_end: isize) -> Result<Self> {
        let depth = self.depth() as isize;
        let end = if n_end <= 0 { depth + n_end } else { n_end.min(depth) };
        if n_begin as isize >= end {
            return Err(PipelineError::DimensionMismatch(format!(
                "cannot cut channels [{n_begin}, {n_end}) from a cube of depth {depth}"
            )));
        }
        let data = self
            .data
            .slice(s![n_begin as isize..end, .., ..])
            .to_owned();
        let mut header = self.header.clone();
        let crpix = header.get_f64(keys::CRPIX3).unwrap_or(1.);
        header.set(keys::CRPIX3, crpix - n_begin as f64);
        header.add_history(format!("zcut: kept channels {n_begin} to {}", end - 1));
        debug!("Cut cube from {depth} to {} channels.", end - n_begin as isize);
        Cube::new(data, header)
    }

    /// Circularly roll every spectrum by `shift` channels.
    pub fn roll_spectral(&mut self, shift: isize) {
        for mut lane in self.data.lanes_mut(Axis(0)) {
            let rolled = roll(lane.view(), shift);
            lane.assign(&rolled);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    use super::*;

    fn ramp_cube(depth: usize) -> Cube {
        let data = Array3::from_shape_fn((depth, 2, 3), |(k, y, x)| (100 * k + 10 * y + x) as f64);
        let mut header = Header::new();
        header.set(keys::CRPIX3, 1.);
        header.set(keys::CRVAL3, 50.);
        header.set(keys::CDELT3, 2.);
        Cube::new(data, header).unwrap()
    }

    #[test]
    fn zcut_python_slice() {
        let cube = ramp_cube(10);
        let cut = cube.zcut(3, -1).unwrap();

        assert_eq!(cut.depth(), 6);
        assert_eq!(cut.header().get_f64(keys::CRPIX3), Some(1. - 3.));
        assert_eq!(cut.header().get_i64(keys::NAXIS3), Some(6));
        assert_eq!(cut.data(), &cube.data().slice(s![3..9, .., ..]).to_owned());
        // calibration of the kept channels is unchanged
        assert_abs_diff_eq!(cut.z()[0], cube.z()[3]);
    }

    #[test]
    fn zcut_rejects_empty_range() {
        let cube = ramp_cube(4);
        assert!(cube.zcut(3, -1).is_err());
        assert!(cube.zcut(2, 3).is_ok());
    }

    #[test]
    fn default_axis_is_channel_index() {
        let cube = Cube::new(Array3::zeros((4, 1, 1)), Header::new()).unwrap();
        assert_eq!(cube.z().to_vec(), vec![0., 1., 2., 3.]);
        assert_eq!(cube.units(), DEFAULT_UNIT);
        assert_eq!(cube.sampling(), 1.);
    }

    #[test]
    fn rolling_and_collapse() {
        let mut cube = ramp_cube(3);
        let collapsed = cube.collapse();
        assert_abs_diff_eq!(collapsed[1], 100. + 5. + 1.);

        cube.roll_spectral(1);
        assert_eq!(cube.spectrum(0, 0).to_vec(), vec![200., 0., 100.]);
    }

    #[test]
    fn line_channel_of_collapsed_spectrum() {
        let data = Array3::from_shape_fn((12, 3, 3), |(k, _, _)| if k == 7 { 5. } else { 1. });
        let cube = Cube::new(data, Header::new()).unwrap();
        assert_eq!(cube.line_channel(), Some(7));
    }

    #[test]
    fn empty_axis_is_rejected() {
        assert!(Cube::new(Array3::zeros((0, 2, 2)), Header::new()).is_err());
    }
}
