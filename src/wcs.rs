//! Linear World Coordinate System axes, as given by `CRPIXn`/`CRVALn`/`CDELTn` header cards.

use crate::header::{Header, keys};

/// Relevant data for a single linear WCS axis.
///
/// `crpix` follows the FITS convention and is 1-based, while the pixel arguments of the
/// conversion functions are 0-based array indices.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisWcs {
    /// Reference pixel (1-based).
    pub crpix: f64,
    /// Coordinate value at `crpix`.
    pub crval: f64,
    /// Increment per pixel.
    pub cdelt: f64,
}

impl AxisWcs {
    /// Create a new instance.
    pub fn new(crpix: f64, crval: f64, cdelt: f64) -> Self {
        Self {
            crpix,
            crval,
            cdelt,
        }
    }

    /// Identity calibration, the world coordinate equals the 0-based index.
    pub fn identity() -> Self {
        Self::new(1., 0., 1.)
    }

    /// Read the axis `n` (1, 2 or 3) from a header.
    /// Returns `None` if the increment is missing; `CRPIXn`/`CRVALn` default to 1 and 0.
    /// For the spectral axis, a `C3_3` card stands in for `CDELT3`.
    pub fn from_header(header: &Header, n: usize) -> Option<Self> {
        let (crpix, crval, cdelt) = match n {
            1 => (keys::CRPIX1, keys::CRVAL1, keys::CDELT1),
            2 => (keys::CRPIX2, keys::CRVAL2, keys::CDELT2),
            3 => (keys::CRPIX3, keys::CRVAL3, keys::CDELT3),
            _ => return None,
        };
        let delta = header
            .get_f64(cdelt)
            .or_else(|| (n == 3).then(|| header.get_f64(keys::C3_3)).flatten())?;
        Some(Self::new(
            header.get_f64(crpix).unwrap_or(1.),
            header.get_f64(crval).unwrap_or(0.),
            delta,
        ))
    }

    /// Write this calibration as axis `n` of a header.
    pub fn write_header(&self, header: &mut Header, n: usize) {
        let (crpix, crval, cdelt) = match n {
            1 => (keys::CRPIX1, keys::CRVAL1, keys::CDELT1),
            2 => (keys::CRPIX2, keys::CRVAL2, keys::CDELT2),
            _ => (keys::CRPIX3, keys::CRVAL3, keys::CDELT3),
        };
        header.set(crpix, self.crpix);
        header.set(crval, self.crval);
        header.set(cdelt, self.cdelt);
        if n == 3 && header.contains(keys::C3_3) {
            header.set(keys::C3_3, self.cdelt);
        }
    }

    /// Transforms a 0-based pixel index to the world coordinate.
    pub fn pixel_to_world(&self, pixel: f64) -> f64 {
        self.crval + self.cdelt * (pixel + 1. - self.crpix)
    }

    /// Transforms a world coordinate to the 0-based pixel index.
    pub fn world_to_pixel(&self, world: f64) -> f64 {
        self.crpix + (world - self.crval) / self.cdelt - 1.
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn consistency_check() {
        let wcs = AxisWcs::new(5.065191000000E+02, 2.711529441199E+01, 1.672682044534E-04);

        let world = wcs.pixel_to_world(0.);
        let px = wcs.world_to_pixel(world);

        assert_abs_diff_eq!(px, 0., epsilon = 1e-8);
    }

    #[test]
    fn spectral_axis_from_cd_matrix() {
        let mut header = Header::new();
        header.set(keys::CRPIX3, 2.);
        header.set(keys::CRVAL3, 100.);
        header.set(keys::C3_3, -4.);

        let wcs = AxisWcs::from_header(&header, 3).unwrap();
        assert_eq!(wcs.pixel_to_world(1.), 100.);
        assert_eq!(wcs.pixel_to_world(0.), 104.);
        assert!(AxisWcs::from_header(&header, 1).is_none());
    }

    #[test]
    fn header_roundtrip() {
        let mut header = Header::new();
        AxisWcs::new(3., 6563., 0.25).write_header(&mut header, 3);
        assert_eq!(
            AxisWcs::from_header(&header, 3),
            Some(AxisWcs::new(3., 6563., 0.25))
        );
    }
}
