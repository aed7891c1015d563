//! Extraction of the observed phase map.
//!
//! Every spaxel is reduced to the channel of its brightest sample. The offset to the channel of
//! the reference spectrum, wrapped into one free spectral range, is the phase of that spaxel.

use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView1};

use crate::batch::{BatchReport, CancelToken, SpaxelFailure};
use crate::center::RefPixel;
use crate::cube::Cube;
use crate::error::{PipelineError, Result};
use crate::finesse::{FinesseEstimate, FinesseEstimator};
use crate::fsr::FreeSpectralRange;
use crate::header::{Header, keys};
use crate::ndarray_utils::{argmax, histogram_mode, mean_std, median};
use crate::phasemap::{PhaseMap, PhaseMapKind};
use crate::wcs::AxisWcs;

/// Number of faintest channels whose median estimates the continuum.
const CONTINUUM_CHANNELS: usize = 5;

/// The normalized spectrum at the reference pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceSpectrum {
    /// Pixel the spectrum was taken at.
    pub ref_pixel: RefPixel,
    /// Intensities divided by their maximum, with mean and histogram mode subtracted.
    pub values: Array1<f64>,
    /// Calibration of the spectral axis.
    pub axis: AxisWcs,
    /// Unit of the spectral axis.
    pub units: String,
    /// Free spectral range the spectrum was extracted with.
    pub fsr: FreeSpectralRange,
    /// Spectral step per channel.
    pub sampling: f64,
}

impl ReferenceSpectrum {
    /// Take and normalize the spectrum at `ref_pixel`.
    pub fn from_cube(cube: &Cube, ref_pixel: RefPixel, fsr: FreeSpectralRange) -> Result<Self> {
        check_ref_pixel(cube, ref_pixel)?;
        let raw = cube.spectrum(ref_pixel.x, ref_pixel.y);
        let max = raw
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() || max == 0. {
            return Err(PipelineError::DegenerateFit(format!(
                "no signal at reference pixel ({}, {})",
                ref_pixel.x, ref_pixel.y
            )));
        }
        let mut values = raw.mapv(|v| v / max);
        let (mean, _) = mean_std(values.iter().copied()).unwrap_or((0., 0.));
        values.mapv_inplace(|v| v - mean);
        // suppresses the triangular baseline left by the scan
        let mode = histogram_mode(values.iter().copied()).unwrap_or(0.);
        values.mapv_inplace(|v| v - mode);

        Ok(Self {
            ref_pixel,
            values,
            axis: cube.spectral_axis(),
            units: cube.units().to_owned(),
            fsr,
            sampling: cube.sampling(),
        })
    }

    /// Spectral coordinate of every sample.
    pub fn z(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.values.len(), |k| self.axis.pixel_to_world(k as f64))
    }

    /// Header cards describing the spectrum.
    pub fn to_header(&self) -> Header {
        let mut header = Header::new();
        header.set(keys::NAXIS1, self.values.len());
        self.ref_pixel.write_header(&mut header);
        // a 1D image carries its spectral axis as axis 1
        self.axis.write_header(&mut header, 1);
        header.set(keys::PHMUNIT, self.units.as_str());
        header.set(keys::PHM_FSR, self.fsr.value);
        header.set(keys::PHMSAMP, self.sampling);
        header
    }
}

/// Outcome of the phase map extraction.
#[derive(Clone, Debug)]
pub struct Extraction {
    /// The observed phase map, zero at the reference pixel.
    pub phase_map: PhaseMap,
    /// The normalized reference spectrum.
    pub reference: ReferenceSpectrum,
    /// Line width of the reference spectrum, if it could be measured.
    pub finesse: Option<FinesseEstimate>,
    /// Spaxels without a peak.
    pub report: BatchReport,
}

/// Extractor of observed phase maps.
#[derive(Clone, Debug, Default)]
pub struct PhaseMapExtractor {
    subtract_continuum: bool,
    threshold: bool,
    calibration_wavelength: Option<f64>,
    finesse: FinesseEstimator,
    cancel: CancelToken,
}

/// Values shared by all spaxels of one extraction.
struct Context {
    reference_channel: usize,
    period: usize,
    sampling: f64,
}

impl PhaseMapExtractor {
    /// Subtract the median of the five faintest channels of every spaxel before the peak
    /// search (default off).
    pub fn with_continuum_subtraction(mut self, subtract_continuum: bool) -> Self {
        self.subtract_continuum = subtract_continuum;
        self
    }

    /// Ignore samples below `mean + std` of their spectrum (default off).
    pub fn with_threshold(mut self, threshold: bool) -> Self {
        self.threshold = threshold;
        self
    }

    /// Wavelength of the calibration line, written to the phase map. Falls back to the
    /// `PHMWCAL` card of the cube.
    pub fn with_calibration_wavelength(mut self, wavelength: f64) -> Self {
        self.calibration_wavelength = Some(wavelength);
        self
    }

    /// Set the estimator used on the reference spectrum.
    pub fn with_finesse_estimator(mut self, finesse: FinesseEstimator) -> Self {
        self.finesse = finesse;
        self
    }

    /// Stop the batch once the token is cancelled.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extract the phase map of `cube` relative to `ref_pixel`.
    pub fn extract(
        &self,
        cube: &Cube,
        ref_pixel: RefPixel,
        fsr: FreeSpectralRange,
    ) -> Result<Extraction> {
        let context = self.context(cube, ref_pixel, fsr)?;
        info!("Extracting phase map.");
        let (width, height) = (cube.width(), cube.height());
        let mut phases = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                self.cancel.check()?;
                phases.push(self.spaxel_phase(&context, cube.spectrum(x, y)));
            }
        }
        self.assemble(cube, ref_pixel, fsr, phases)
    }

    fn context(&self, cube: &Cube, ref_pixel: RefPixel, fsr: FreeSpectralRange) -> Result<Context> {
        fsr.validate()?;
        check_ref_pixel(cube, ref_pixel)?;
        let reference_channel = self
            .peak_channel(cube.spectrum(ref_pixel.x, ref_pixel.y))
            .ok_or_else(|| {
                PipelineError::DegenerateFit(format!(
                    "no peak at reference pixel ({}, {})",
                    ref_pixel.x, ref_pixel.y
                ))
            })?;
        Ok(Context {
            reference_channel,
            period: fsr.channels,
            sampling: cube.sampling(),
        })
    }

    fn peak_channel(&self, spectrum: ArrayView1<'_, f64>) -> Option<usize> {
        let mut spectrum = spectrum.to_owned();
        if self.subtract_continuum {
            let mut sorted: Vec<f64> = spectrum.iter().copied().filter(|v| v.is_finite()).collect();
            sorted.sort_by(f64::total_cmp);
            let continuum = median(sorted.into_iter().take(CONTINUUM_CHANNELS))?;
            spectrum.mapv_inplace(|v| v - continuum);
        }
        if self.threshold {
            let (mean, std) = mean_std(spectrum.iter().copied())?;
            let floor = mean + std;
            spectrum.mapv_inplace(|v| if v < floor { 0. } else { v });
            if spectrum.iter().all(|&v| v.is_nan() || v <= 0.) {
                return None;
            }
        }
        argmax(spectrum.view())
    }

    fn spaxel_phase(
        &self,
        context: &Context,
        spectrum: ArrayView1<'_, f64>,
    ) -> std::result::Result<f64, SpaxelFailure> {
        let channel = self
            .peak_channel(spectrum)
            .ok_or(SpaxelFailure::AmbiguousPeak)?;
        let offset = (channel as isize - context.reference_channel as isize)
            .rem_euclid(context.period as isize);
        Ok(offset as f64 * context.sampling)
    }

    fn assemble(
        &self,
        cube: &Cube,
        ref_pixel: RefPixel,
        fsr: FreeSpectralRange,
        phases: Vec<std::result::Result<f64, SpaxelFailure>>,
    ) -> Result<Extraction> {
        let mut report = BatchReport::new(phases.len());
        let values: Vec<f64> = phases
            .into_iter()
            .map(|phase| {
                phase.unwrap_or_else(|failure| {
                    report.record(failure);
                    f64::NAN
                })
            })
            .collect();
        let data = Array2::from_shape_vec((cube.height(), cube.width()), values)
            .map_err(|e| PipelineError::DimensionMismatch(e.to_string()))?;

        let mut phase_map = PhaseMap::new(
            data,
            PhaseMapKind::Observed,
            ref_pixel,
            fsr.value,
            cube.sampling(),
            cube.units(),
        )?;
        phase_map.zero_at_reference();
        phase_map.calibration_wavelength = self
            .calibration_wavelength
            .or_else(|| cube.header().get_f64(keys::PHMWCAL));

        let reference = ReferenceSpectrum::from_cube(cube, ref_pixel, fsr)?;
        let finesse = match self
            .finesse
            .estimate(reference.values.view(), fsr, cube.sampling())
        {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                warn!("Finesse not measured: {e}");
                None
            }
        };
        phase_map.finesse = finesse.as_ref().map(|f| f.finesse);

        report.log_summary("phase map extraction");
        Ok(Extraction {
            phase_map,
            reference,
            finesse,
            report,
        })
    }
}

fn check_ref_pixel(cube: &Cube, ref_pixel: RefPixel) -> Result<()> {
    if ref_pixel.x >= cube.width() || ref_pixel.y >= cube.height() {
        return Err(PipelineError::DimensionMismatch(format!(
            "reference pixel ({}, {}) outside of a {} x {} cube",
            ref_pixel.x,
            ref_pixel.y,
            cube.width(),
            cube.height()
        )));
    }
    Ok(())
}

#[cfg(feature = "parallel")]
mod parallel {
    use rayon::prelude::*;

    use super::*;

    impl PhaseMapExtractor {
        /// Extract the phase map, processing the spaxels in parallel.
        ///
        /// Also see [`extract`](PhaseMapExtractor::extract()) for more details.
        pub fn extract_par(
            &self,
            cube: &Cube,
            ref_pixel: RefPixel,
            fsr: FreeSpectralRange,
        ) -> Result<Extraction> {
            let context = self.context(cube, ref_pixel, fsr)?;
            info!("Extracting phase map in parallel.");
            let width = cube.width();
            let phases = (0..width * cube.height())
                .into_par_iter()
                .map(|i| -> Result<_> {
                    self.cancel.check()?;
                    Ok(self.spaxel_phase(&context, cube.spectrum(i % width, i / width)))
                })
                .collect::<Result<Vec<_>>>()?;
            self.assemble(cube, ref_pixel, fsr, phases)
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::s;

    use super::*;
    use crate::synthetic::AiryCube;

    const FSR: FreeSpectralRange = FreeSpectralRange {
        value: 24.,
        channels: 24,
    };

    fn channel_distance(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(24.);
        d.min(24. - d)
    }

    #[test]
    fn phase_follows_ring_geometry() {
        let model = AiryCube::default();
        let cube = model.build().unwrap();
        let ref_pixel = RefPixel::new(55, 68);
        let extraction = PhaseMapExtractor::default()
            .extract(&cube, ref_pixel, FSR)
            .unwrap();
        let map = &extraction.phase_map;

        assert_eq!(map.value(55, 68), 0.);
        assert_eq!(extraction.report.failed(), 0);
        for (x, y) in [(10, 10), (100, 30), (60, 115), (55, 90)] {
            let expected = model.phase_channels(x as f64, y as f64) - model.phase_channels(55., 68.);
            assert!(
                channel_distance(map.value(x, y), expected) <= 1.,
                "({x}, {y}): {} vs {expected}",
                map.value(x, y)
            );
            assert!(map.value(x, y) >= 0. && map.value(x, y) < 24.);
        }
        let finesse = extraction.finesse.unwrap();
        assert!(finesse.finesse > 5. && finesse.finesse < 9.);
        assert_eq!(map.finesse, Some(finesse.finesse));
    }

    #[test]
    fn reference_pixel_is_exactly_zero_with_negative_sampling() {
        let cube = AiryCube::default().with_sampling(-0.75).build().unwrap();
        let fsr = FreeSpectralRange {
            value: 18.,
            channels: 24,
        };
        let extraction = PhaseMapExtractor::default()
            .with_threshold(true)
            .extract(&cube, RefPixel::new(3, 7), fsr)
            .unwrap();
        assert_eq!(extraction.phase_map.value(3, 7), 0.);
        assert!(extraction.phase_map.value(100, 100) <= 0.);
    }

    #[test]
    fn continuum_does_not_change_the_map() {
        let model = AiryCube::default().with_shape(40, 30, 48);
        let plain = PhaseMapExtractor::default()
            .extract(&model.build().unwrap(), RefPixel::new(20, 15), FSR)
            .unwrap();
        let offset = PhaseMapExtractor::default()
            .with_continuum_subtraction(true)
            .with_threshold(true)
            .extract(
                &model.with_continuum(100.).build().unwrap(),
                RefPixel::new(20, 15),
                FSR,
            )
            .unwrap();
        assert_eq!(plain.phase_map.data, offset.phase_map.data);
    }

    #[test]
    fn failed_spaxels_are_counted() {
        let (mut data, header) = AiryCube::default()
            .with_shape(20, 10, 48)
            .build()
            .unwrap()
            .into_parts();
        data.slice_mut(s![.., 2, 4]).fill(f64::NAN);
        let cube = Cube::new(data, header).unwrap();

        let extraction = PhaseMapExtractor::default()
            .extract(&cube, RefPixel::new(0, 0), FSR)
            .unwrap();
        assert_eq!(extraction.report.count(SpaxelFailure::AmbiguousPeak), 1);
        assert!(extraction.phase_map.value(4, 2).is_nan());
    }

    #[test]
    fn cancelled_batch() {
        let cube = AiryCube::default().with_shape(10, 10, 48).build().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = PhaseMapExtractor::default()
            .with_cancel_token(token)
            .extract(&cube, RefPixel::new(5, 5), FSR);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn reference_outside_cube() {
        let cube = AiryCube::default().with_shape(10, 10, 48).build().unwrap();
        let result = PhaseMapExtractor::default().extract(&cube, RefPixel::new(10, 0), FSR);
        assert!(matches!(result, Err(PipelineError::DimensionMismatch(_))));
    }

    #[test]
    fn reference_spectrum_is_normalized() {
        let cube = AiryCube::default().with_continuum(3.).build().unwrap();
        let reference = ReferenceSpectrum::from_cube(&cube, RefPixel::new(55, 68), FSR).unwrap();
        let range = |values: ArrayView1<'_, f64>| {
            let max = values.iter().copied().fold(f64::MIN, f64::max);
            let min = values.iter().copied().fold(f64::MAX, f64::min);
            (min, max)
        };
        let (raw_min, raw_max) = range(cube.spectrum(55, 68));
        let (min, max) = range(reference.values.view());

        assert_abs_diff_eq!(max - min, (raw_max - raw_min) / raw_max, epsilon = 1e-12);
        assert!(min < 0. && max > 0.);
        assert_eq!(reference.z()[5], 5.);
    }

    #[test]
    fn reference_spectrum_header_carries_the_fsr() {
        let cube = AiryCube::default()
            .with_shape(20, 20, 48)
            .with_sampling(-0.75)
            .build()
            .unwrap();
        let fsr = FreeSpectralRange {
            value: 18.,
            channels: 24,
        };
        let extraction = PhaseMapExtractor::default()
            .extract(&cube, RefPixel::new(10, 12), fsr)
            .unwrap();
        let header = extraction.reference.to_header();

        assert_eq!(extraction.reference.fsr, fsr);
        assert_eq!(header.get_f64(keys::PHM_FSR), Some(18.));
        assert_eq!(header.get_f64(keys::PHMSAMP), Some(-0.75));
        assert_eq!(header.get_i64(keys::PHMREFX), Some(10));
        assert_eq!(header.get_i64(keys::NAXIS1), Some(48));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_matches_sequential() {
        let cube = AiryCube::default().with_shape(50, 40, 48).build().unwrap();
        let extractor = PhaseMapExtractor::default();
        let sequential = extractor.extract(&cube, RefPixel::new(25, 20), FSR).unwrap();
        let parallel = extractor.extract_par(&cube, RefPixel::new(25, 20), FSR).unwrap();
        assert_eq!(sequential.phase_map.data, parallel.phase_map.data);
        assert_eq!(sequential.report, parallel.report);
    }
}
