//! Associative header of calibration metadata, modelled on FITS header cards.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PipelineError, Result};

/// Header keys understood by the pipeline.
pub mod keys {
    /// Number of columns.
    pub const NAXIS1: &str = "NAXIS1";
    /// Number of rows.
    pub const NAXIS2: &str = "NAXIS2";
    /// Number of channels.
    pub const NAXIS3: &str = "NAXIS3";
    /// Spatial calibration, x axis.
    pub const CRPIX1: &str = "CRPIX1";
    /// Spatial calibration, x axis.
    pub const CRVAL1: &str = "CRVAL1";
    /// Spatial calibration, x axis.
    pub const CDELT1: &str = "CDELT1";
    /// Spatial calibration, y axis.
    pub const CRPIX2: &str = "CRPIX2";
    /// Spatial calibration, y axis.
    pub const CRVAL2: &str = "CRVAL2";
    /// Spatial calibration, y axis.
    pub const CDELT2: &str = "CDELT2";
    /// Reference channel of the spectral axis (1-based).
    pub const CRPIX3: &str = "CRPIX3";
    /// Spectral value at `CRPIX3`.
    pub const CRVAL3: &str = "CRVAL3";
    /// Spectral increment per channel.
    pub const CDELT3: &str = "CDELT3";
    /// Spectral increment per channel, CD matrix form.
    pub const C3_3: &str = "C3_3";
    /// Unit of the spectral axis.
    pub const CUNIT3: &str = "CUNIT3";

    /// Reference pixel, x (0-based column).
    pub const PHMREFX: &str = "PHMREFX";
    /// Reference pixel, y (0-based row).
    pub const PHMREFY: &str = "PHMREFY";
    /// `"observed"` or `"parabola fit"`.
    pub const PHMTYPE: &str = "PHMTYPE";
    /// File the phase map was measured on.
    pub const PHMREFF: &str = "PHMREFF";
    /// Calibration wavelength.
    pub const PHMWCAL: &str = "PHMWCAL";
    /// Free spectral range in spectral units.
    pub const PHM_FSR: &str = "PHM_FSR";
    /// Unit of the phase map values.
    pub const PHMUNIT: &str = "PHMUNIT";
    /// Spectral sampling of the cube the phase map was measured on.
    pub const PHMSAMP: &str = "PHMSAMP";
    /// Parabola coefficient of `r^2`.
    pub const PHMFIT_A: &str = "PHMFIT_A";
    /// Parabola coefficient of `r`.
    pub const PHMFIT_B: &str = "PHMFIT_B";
    /// Parabola constant term.
    pub const PHMFIT_C: &str = "PHMFIT_C";
    /// Finesse measured on the reference spectrum.
    pub const PHMFINES: &str = "PHMFINES";
    /// Phase map applied to a corrected cube.
    pub const PHMAPPLY: &str = "PHMAPPLY";

    /// Nominal etalon gap in microns.
    pub const FPGAP: &str = "FPGAP";
    /// Systemic (observed) wavelength in angstrom.
    pub const FPWOBS: &str = "FPWOBS";
    /// Queensgate constant written by the wavelength calibration.
    pub const WCALQGC: &str = "WCALQGC";

    /// Every key carried across a FITS read.
    pub const ALL: &[&str] = &[
        NAXIS1, NAXIS2, NAXIS3, CRPIX1, CRVAL1, CDELT1, CRPIX2, CRVAL2, CDELT2, CRPIX3, CRVAL3,
        CDELT3, C3_3, CUNIT3, PHMREFX, PHMREFY, PHMTYPE, PHMREFF, PHMWCAL, PHM_FSR, PHMUNIT,
        PHMSAMP, PHMFIT_A, PHMFIT_B, PHMFIT_C, PHMFINES, PHMAPPLY, FPGAP, FPWOBS, WCALQGC,
    ];
}

/// Value of a header card.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    /// Floating point value.
    Float(f64),
    /// Integer value.
    Int(i64),
    /// Character string.
    Str(String),
}

impl HeaderValue {
    /// Numeric view of the value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Str(_) => None,
        }
    }

    /// Integer view of the value; floats are accepted if they hold an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            HeaderValue::Float(v) if v.fract() == 0. => Some(*v as i64),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Float(v) => write!(f, "{v}"),
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<usize> for HeaderValue {
    fn from(value: usize) -> Self {
        HeaderValue::Int(value as i64)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

/// Header cards plus the history log of the processing steps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    cards: BTreeMap<String, HeaderValue>,
    history: Vec<String>,
}

impl Header {
    /// Empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a card, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.cards.insert(key.to_owned(), value.into());
    }

    /// Remove a card.
    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        self.cards.remove(key)
    }

    /// Raw card value.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.get(key)
    }

    /// Whether the card is present.
    pub fn contains(&self, key: &str) -> bool {
        self.cards.contains_key(key)
    }

    /// Numeric card value.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    /// Integer card value.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HeaderValue::as_i64)
    }

    /// String card value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    /// Numeric card value that must be present.
    pub fn require_f64(&self, key: &str) -> Result<f64> {
        self.get_f64(key)
            .ok_or_else(|| PipelineError::MissingCalibrationData(key.to_owned()))
    }

    /// Append a history entry.
    pub fn add_history(&mut self, entry: impl Into<String>) {
        self.history.push(entry.into());
    }

    /// History entries, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Iterate over all cards in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let mut header = Header::new();
        header.set(keys::CRPIX3, 3_i64);
        header.set(keys::CDELT3, -0.5);
        header.set(keys::CUNIT3, "bcv");

        assert_eq!(header.get_f64(keys::CRPIX3), Some(3.));
        assert_eq!(header.get_i64(keys::CRPIX3), Some(3));
        assert_eq!(header.get_f64(keys::CDELT3), Some(-0.5));
        assert_eq!(header.get_i64(keys::CDELT3), None);
        assert_eq!(header.get_str(keys::CUNIT3), Some("bcv"));
        assert_eq!(header.get_f64(keys::CUNIT3), None);
    }

    #[test]
    fn missing_value_is_named() {
        let header = Header::new();
        match header.require_f64(keys::FPGAP) {
            Err(PipelineError::MissingCalibrationData(key)) => assert_eq!(key, keys::FPGAP),
            other => panic!("unexpected {other:?}"),
        }
    }
}
