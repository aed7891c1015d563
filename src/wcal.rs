//! Wavelength calibration of the spectral axis.
//!
//! The scan is linear in the etalon control unit (BCV). One free spectral range in BCV covers
//! one free spectral range in wavelength, which follows from the interference order at the
//! observed wavelength and the nominal gap.

use log::{debug, info};

use crate::cube::Cube;
use crate::error::{PipelineError, Result};
use crate::header::{Header, keys};
use crate::wcs::AxisWcs;

/// Unit written to `CUNIT3` by the calibration.
pub const WAVELENGTH_UNIT: &str = "angstrom";

/// Interference order at `wavelength` (angstrom) for an etalon `gap` (microns).
pub fn interference_order(wavelength: f64, gap: f64) -> f64 {
    2. * gap * 1e4 / wavelength
}

/// Free spectral range in angstrom at `wavelength` (angstrom) for an etalon `gap` (microns).
pub fn fsr_angstrom(wavelength: f64, gap: f64) -> f64 {
    let order = interference_order(wavelength, gap);
    wavelength / order / (1. - 1. / (order * order))
}

/// Calibration values. Each one is taken from here if set, else from the headers, else it is
/// reported as missing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationParams {
    /// Nominal etalon gap in microns (`FPGAP`).
    pub gap: Option<f64>,
    /// Observed (systemic) wavelength in angstrom (`FPWOBS`).
    pub wavelength: Option<f64>,
    /// Wavelength of the calibration line in angstrom (`PHMWCAL`).
    pub calibration_wavelength: Option<f64>,
    /// Free spectral range in the units of the scan (`PHM_FSR`).
    pub fsr: Option<f64>,
}

impl CalibrationParams {
    /// Set the etalon gap in microns.
    pub fn with_gap(mut self, gap: f64) -> Self {
        self.gap = Some(gap);
        self
    }

    /// Set the observed wavelength in angstrom.
    pub fn with_wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = Some(wavelength);
        self
    }

    /// Set the calibration wavelength in angstrom.
    pub fn with_calibration_wavelength(mut self, wavelength: f64) -> Self {
        self.calibration_wavelength = Some(wavelength);
        self
    }

    /// Set the free spectral range in scan units.
    pub fn with_fsr(mut self, fsr: f64) -> Self {
        self.fsr = Some(fsr);
        self
    }

    /// Etalon gap.
    pub fn gap(&self, headers: &[&Header]) -> Result<f64> {
        resolve(self.gap, headers, keys::FPGAP)
    }

    /// Observed wavelength.
    pub fn wavelength(&self, headers: &[&Header]) -> Result<f64> {
        resolve(self.wavelength, headers, keys::FPWOBS)
    }

    /// Calibration wavelength.
    pub fn calibration_wavelength(&self, headers: &[&Header]) -> Result<f64> {
        resolve(self.calibration_wavelength, headers, keys::PHMWCAL)
    }

    /// Free spectral range in scan units, always positive.
    pub fn fsr(&self, headers: &[&Header]) -> Result<f64> {
        resolve(self.fsr, headers, keys::PHM_FSR).map(f64::abs)
    }
}

fn resolve(explicit: Option<f64>, headers: &[&Header], key: &str) -> Result<f64> {
    let value = explicit
        .or_else(|| headers.iter().find_map(|h| h.get_f64(key)))
        .ok_or_else(|| PipelineError::MissingCalibrationData(key.to_owned()))?;
    if !value.is_finite() || value == 0. {
        return Err(PipelineError::InvalidData(format!("{key} = {value}")));
    }
    Ok(value)
}

/// Converter of a BCV spectral axis to wavelength.
#[derive(Clone, Debug, Default)]
pub struct WavelengthCalibrator {
    params: CalibrationParams,
}

impl WavelengthCalibrator {
    /// Use the given calibration values ahead of the header.
    pub fn with_params(mut self, params: CalibrationParams) -> Self {
        self.params = params;
        self
    }

    /// Calibration values.
    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Queensgate constant, calibration wavelength over the free spectral range in BCV.
    pub fn queensgate_constant(&self, headers: &[&Header]) -> Result<f64> {
        Ok(self.params.calibration_wavelength(headers)? / self.params.fsr(headers)?)
    }

    /// Free spectral range in scan units at the observed wavelength. The scan covers one
    /// range per half wavelength of gap change, so it scales with the wavelength.
    pub fn observed_fsr(&self, headers: &[&Header]) -> Result<f64> {
        Ok(self.params.wavelength(headers)? / self.queensgate_constant(headers)?)
    }

    /// Wavelength increment per channel for a scan step of `sampling`.
    pub fn wavelength_step(&self, headers: &[&Header], sampling: f64) -> Result<f64> {
        let wavelength = self.params.wavelength(headers)?;
        let gap = self.params.gap(headers)?;
        let w_fsr = fsr_angstrom(wavelength, gap);
        let z_fsr = self.observed_fsr(headers)?;
        debug!("Free spectral range of {w_fsr:.4} angstrom over {z_fsr:.4} scan units.");
        Ok(w_fsr / z_fsr * sampling)
    }

    /// Linear solution with the observed wavelength at `anchor`, a 0-based channel.
    pub fn solution(&self, headers: &[&Header], sampling: f64, anchor: usize) -> Result<AxisWcs> {
        let step = self.wavelength_step(headers, sampling)?;
        let wavelength = self.params.wavelength(headers)?;
        Ok(AxisWcs::new(anchor as f64 + 1., wavelength, step))
    }

    /// Calibrate the spectral axis of `cube`, placing the observed wavelength at the line
    /// of the collapsed spectrum.
    pub fn calibrate(&self, cube: &Cube) -> Result<Cube> {
        let headers = [cube.header()];
        let qgc = self.queensgate_constant(&headers)?;
        let anchor = cube
            .line_channel()
            .ok_or_else(|| PipelineError::DegenerateFit("cube has no line".to_owned()))?;
        let axis = self.solution(&headers, cube.sampling(), anchor)?;
        info!(
            "Wavelength solution: {:.4} {WAVELENGTH_UNIT} at channel {}, {:.5} per channel (QGC {qgc:.5}).",
            axis.crval, anchor, axis.cdelt
        );

        let mut calibrated = cube.clone();
        let header = calibrated.header_mut();
        axis.write_header(header, 3);
        header.set(keys::CUNIT3, WAVELENGTH_UNIT);
        header.set(keys::WCALQGC, qgc);
        header.add_history(format!("wcal: QGC {qgc:.6}, CDELT3 {:.6}", axis.cdelt));
        Ok(calibrated)
    }
}
