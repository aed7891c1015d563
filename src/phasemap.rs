//! The phase map: per-spaxel spectral offset of the line relative to the reference pixel.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;

use crate::center::RefPixel;
use crate::cube::DEFAULT_UNIT;
use crate::error::{PipelineError, Result};
use crate::header::{Header, keys};
use crate::polyfit::Parabola;

/// How a phase map was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseMapKind {
    /// Measured spaxel by spaxel.
    Observed,
    /// Radial parabola fitted to an observed map.
    ParabolaFit,
    /// Fitted minus observed map.
    Residual,
}

impl PhaseMapKind {
    /// Value of the `PHMTYPE` card.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseMapKind::Observed => "observed",
            PhaseMapKind::ParabolaFit => "parabola fit",
            PhaseMapKind::Residual => "residual",
        }
    }
}

impl fmt::Display for PhaseMapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseMapKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "observed" => Ok(PhaseMapKind::Observed),
            "parabola fit" => Ok(PhaseMapKind::ParabolaFit),
            "residual" => Ok(PhaseMapKind::Residual),
            other => Err(PipelineError::InvalidData(format!(
                "unknown phase map type `{other}`"
            ))),
        }
    }
}

/// A phase map in the units of the spectral axis it was measured on.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseMap {
    /// Offsets, `(row, column)`.
    pub data: Array2<f64>,
    /// How the map was obtained.
    pub kind: PhaseMapKind,
    /// Pixel where the map is zero.
    pub ref_pixel: RefPixel,
    /// Free spectral range in spectral units.
    pub fsr: f64,
    /// Signed spectral increment per channel.
    pub sampling: f64,
    /// Unit of the values.
    pub units: String,
    /// File the map was measured on.
    pub source: Option<String>,
    /// Wavelength of the calibration line.
    pub calibration_wavelength: Option<f64>,
    /// Finesse of the reference spectrum.
    pub finesse: Option<f64>,
    /// Radial model, for fitted maps.
    pub model: Option<Parabola>,
}

impl PhaseMap {
    /// Create a new map. The reference pixel must lie inside `data`.
    pub fn new(
        data: Array2<f64>,
        kind: PhaseMapKind,
        ref_pixel: RefPixel,
        fsr: f64,
        sampling: f64,
        units: impl Into<String>,
    ) -> Result<Self> {
        let (height, width) = data.dim();
        if ref_pixel.x >= width || ref_pixel.y >= height {
            return Err(PipelineError::DimensionMismatch(format!(
                "reference pixel ({}, {}) outside of a {width} x {height} phase map",
                ref_pixel.x, ref_pixel.y
            )));
        }
        Ok(Self {
            data,
            kind,
            ref_pixel,
            fsr,
            sampling,
            units: units.into(),
            source: None,
            calibration_wavelength: None,
            finesse: None,
            model: None,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Value at column `x`, row `y`.
    pub fn value(&self, x: usize, y: usize) -> f64 {
        self.data[[y, x]]
    }

    /// Value at the reference pixel.
    pub fn reference_value(&self) -> f64 {
        self.value(self.ref_pixel.x, self.ref_pixel.y)
    }

    /// Subtract the reference value so that the reference pixel is exactly zero.
    pub fn zero_at_reference(&mut self) {
        let reference = self.reference_value();
        if reference.is_finite() {
            self.data.mapv_inplace(|v| v - reference);
        }
        self.data[[self.ref_pixel.y, self.ref_pixel.x]] = 0.;
    }

    /// Header cards describing the map.
    pub fn to_header(&self) -> Header {
        let mut header = Header::new();
        header.set(keys::NAXIS1, self.width());
        header.set(keys::NAXIS2, self.height());
        self.ref_pixel.write_header(&mut header);
        header.set(keys::PHMTYPE, self.kind.as_str());
        header.set(keys::PHM_FSR, self.fsr);
        header.set(keys::PHMSAMP, self.sampling);
        header.set(keys::PHMUNIT, self.units.as_str());
        if let Some(source) = &self.source {
            header.set(keys::PHMREFF, source.as_str());
        }
        if let Some(wavelength) = self.calibration_wavelength {
            header.set(keys::PHMWCAL, wavelength);
        }
        if let Some(finesse) = self.finesse {
            header.set(keys::PHMFINES, finesse);
        }
        if let Some(model) = &self.model {
            header.set(keys::PHMFIT_A, model.a);
            header.set(keys::PHMFIT_B, model.b);
            header.set(keys::PHMFIT_C, model.c);
        }
        header
    }

    /// Rebuild a map from its image and header.
    pub fn from_parts(data: Array2<f64>, header: &Header) -> Result<Self> {
        let ref_pixel = RefPixel::from_header(header).ok_or_else(|| {
            PipelineError::MissingCalibrationData(format!("{}/{}", keys::PHMREFX, keys::PHMREFY))
        })?;
        let kind = match header.get_str(keys::PHMTYPE) {
            Some(kind) => kind.parse()?,
            None => PhaseMapKind::Observed,
        };
        let mut map = Self::new(
            data,
            kind,
            ref_pixel,
            header.require_f64(keys::PHM_FSR)?,
            header.require_f64(keys::PHMSAMP)?,
            header.get_str(keys::PHMUNIT).unwrap_or(DEFAULT_UNIT),
        )?;
        map.source = header.get_str(keys::PHMREFF).map(str::to_owned);
        map.calibration_wavelength = header.get_f64(keys::PHMWCAL);
        map.finesse = header.get_f64(keys::PHMFINES);
        map.model = match (
            header.get_f64(keys::PHMFIT_A),
            header.get_f64(keys::PHMFIT_B),
            header.get_f64(keys::PHMFIT_C),
        ) {
            (Some(a), Some(b), Some(c)) => Some(Parabola::new(a, b, c)),
            _ => None,
        };
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn zeroing_and_header_roundtrip() {
        let data = array![[1., 2., 3.], [4., 5., f64::NAN]];
        let mut map = PhaseMap::new(
            data,
            PhaseMapKind::ParabolaFit,
            RefPixel::new(1, 1),
            24.,
            -0.5,
            "bcv",
        )
        .unwrap();
        map.model = Some(Parabola::new(0.01, 0., 0.));
        map.source = Some("scan.fits".to_owned());
        map.zero_at_reference();

        assert_eq!(map.reference_value(), 0.);
        assert_eq!(map.value(0, 0), -4.);
        assert!(map.value(2, 1).is_nan());

        let header = map.to_header();
        assert_eq!(header.get_str(keys::PHMTYPE), Some("parabola fit"));
        let back = PhaseMap::from_parts(map.data.clone(), &header).unwrap();
        assert_eq!(back.kind, map.kind);
        assert_eq!(back.ref_pixel, map.ref_pixel);
        assert_eq!((back.fsr, back.sampling), (24., -0.5));
        assert_eq!(back.units, "bcv");
        assert_eq!(back.source, map.source);
        assert_eq!(back.model, map.model);
        assert_eq!(back.finesse, None);
    }

    #[test]
    fn reference_outside_is_rejected() {
        let result = PhaseMap::new(
            Array2::zeros((2, 2)),
            PhaseMapKind::Observed,
            RefPixel::new(2, 0),
            10.,
            1.,
            DEFAULT_UNIT,
        );
        assert!(matches!(result, Err(PipelineError::DimensionMismatch(_))));
    }

    #[test]
    fn header_needs_reference_pixel() {
        let result = PhaseMap::from_parts(Array2::zeros((2, 2)), &Header::new());
        assert!(matches!(
            result,
            Err(PipelineError::MissingCalibrationData(_))
        ));
    }
}
