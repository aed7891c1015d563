//! Spectral resampling of a cube onto a common phase.
//!
//! Every spectrum is shifted by its phase map value. The shift is done on a spline through
//! three copies of one free spectral range, so that it wraps around smoothly, at a resolution
//! of a fraction of a channel.

use log::{debug, info, warn};
use ndarray::{Array1, Array3, ArrayView1, s};

use crate::batch::{BatchReport, CancelToken, SpaxelFailure};
use crate::cube::Cube;
use crate::error::{PipelineError, Result};
use crate::fsr::FreeSpectralRange;
use crate::header::keys;
use crate::phasemap::PhaseMap;
use crate::spline::CubicSpline;
use crate::wcal::{WAVELENGTH_UNIT, WavelengthCalibrator};

/// Result of [`PhaseMapApplier::apply`].
#[derive(Clone, Debug)]
pub struct Correction {
    /// The resampled cube, one free spectral range deep.
    pub cube: Cube,
    /// Spaxels that could not be resampled.
    pub report: BatchReport,
}

/// Resampler that removes the phase map from a cube.
#[derive(Clone, Debug)]
pub struct PhaseMapApplier {
    oversample: usize,
    center: bool,
    calibrator: Option<WavelengthCalibrator>,
    cancel: CancelToken,
}

impl Default for PhaseMapApplier {
    fn default() -> Self {
        Self {
            oversample: 10,
            center: false,
            calibrator: None,
            cancel: CancelToken::default(),
        }
    }
}

struct Context {
    period: usize,
    sampling: f64,
}

impl PhaseMapApplier {
    /// Set the points per channel of the interpolated spectra (default `10`).
    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }

    /// Roll the corrected cube so that the line sits on the middle channel (default `false`).
    pub fn with_centering(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    /// Write a wavelength solution from `calibrator` instead of keeping the scan axis.
    pub fn with_calibrator(mut self, calibrator: WavelengthCalibrator) -> Self {
        self.calibrator = Some(calibrator);
        self
    }

    /// Stop the batch once the token is cancelled.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shift every spectrum of `cube` by the value of `map` at its spaxel.
    pub fn apply(&self, cube: &Cube, map: &PhaseMap) -> Result<Correction> {
        let context = self.context(cube, map)?;
        info!("Applying phase map.");
        let mut spectra = Vec::with_capacity(cube.width() * cube.height());
        for y in 0..cube.height() {
            for x in 0..cube.width() {
                self.cancel.check()?;
                spectra.push(self.shift_spectrum(&context, cube.spectrum(x, y), map.value(x, y)));
            }
        }
        self.assemble(cube, map, &context, spectra)
    }

    fn context(&self, cube: &Cube, map: &PhaseMap) -> Result<Context> {
        if (map.width(), map.height()) != (cube.width(), cube.height()) {
            return Err(PipelineError::DimensionMismatch(format!(
                "phase map is {} x {}, cube is {} x {}",
                map.width(),
                map.height(),
                cube.width(),
                cube.height()
            )));
        }
        let sampling = cube.sampling();
        if (map.sampling - sampling).abs() > 1e-6 * sampling.abs() {
            warn!(
                "Phase map was measured with sampling {}, the cube has {sampling}.",
                map.sampling
            );
        }
        let fsr = FreeSpectralRange::from_value(map.fsr, sampling)?;
        if fsr.channels > cube.depth() {
            return Err(PipelineError::DimensionMismatch(format!(
                "one free spectral range is {} channels, the cube has {}",
                fsr.channels,
                cube.depth()
            )));
        }
        debug!("Resampling {} channels per spectrum.", fsr.channels);
        Ok(Context {
            period: fsr.channels,
            sampling,
        })
    }

    /// First free spectral range of `spectrum`, shifted by `phase`.
    ///
    /// Sampling the spline at every `oversample`-th point of the rolled fine grid is the same
    /// as rolling the whole fine grid and decimating it.
    fn shift_spectrum(
        &self,
        context: &Context,
        spectrum: ArrayView1<'_, f64>,
        phase: f64,
    ) -> std::result::Result<Array1<f64>, SpaxelFailure> {
        if !phase.is_finite() {
            return Err(SpaxelFailure::AmbiguousPeak);
        }
        let period = context.period;
        let window = spectrum.slice(s![..period]);
        if window.iter().any(|v| !v.is_finite()) {
            return Err(SpaxelFailure::FitFailure);
        }
        let tripled: Vec<f64> = window.iter().cycle().take(3 * period).copied().collect();
        let spline = CubicSpline::uniform(&tripled).ok_or(SpaxelFailure::FitFailure)?;

        let n = self.oversample as isize;
        let fine_points = period as isize * n;
        let shift = (phase / context.sampling * n as f64).round() as isize;
        Ok(Array1::from_shape_fn(period, |k| {
            let j = (k as isize * n + shift).rem_euclid(fine_points);
            spline.evaluate(period as f64 + j as f64 / n as f64)
        }))
    }

    fn assemble(
        &self,
        cube: &Cube,
        map: &PhaseMap,
        context: &Context,
        spectra: Vec<std::result::Result<Array1<f64>, SpaxelFailure>>,
    ) -> Result<Correction> {
        let (width, height) = (cube.width(), cube.height());
        let mut report = BatchReport::new(spectra.len());
        let mut data = Array3::from_elem((context.period, height, width), f64::NAN);
        for (i, spectrum) in spectra.into_iter().enumerate() {
            match spectrum {
                Ok(spectrum) => data
                    .slice_mut(s![.., i / width, i % width])
                    .assign(&spectrum),
                Err(failure) => report.record(failure),
            }
        }

        let mut header = cube.header().clone();
        header.set(keys::PHMAPPLY, map.kind.as_str());
        header.add_history(format!(
            "phmapply: {} phase map, reference pixel ({}, {})",
            map.kind, map.ref_pixel.x, map.ref_pixel.y
        ));
        let mut corrected = Cube::new(data, header)?;

        if self.center {
            if let Some(peak) = corrected.line_channel() {
                let shift = (context.period / 2) as isize - peak as isize;
                debug!("Centering line from channel {peak}, shift {shift}.");
                corrected.roll_spectral(shift);
                let mut axis = corrected.spectral_axis();
                axis.crpix += shift as f64;
                axis.write_header(corrected.header_mut(), 3);
            } else {
                warn!("Corrected cube has no line to center.");
            }
        }

        if let Some(calibrator) = &self.calibrator {
            let anchor = corrected
                .line_channel()
                .ok_or_else(|| PipelineError::DegenerateFit("corrected cube has no line".to_owned()))?;
            let map_header = map.to_header();
            let headers = [cube.header(), &map_header];
            let axis = calibrator.solution(&headers, context.sampling, anchor)?;
            info!(
                "Wavelength solution: {:.4} {WAVELENGTH_UNIT} at channel {anchor}, {:.5} per channel.",
                axis.crval, axis.cdelt
            );
            let header = corrected.header_mut();
            axis.write_header(header, 3);
            header.set(keys::CUNIT3, WAVELENGTH_UNIT);
        }

        report.log_summary("phase map correction");
        Ok(Correction {
            cube: corrected,
            report,
        })
    }
}

#[cfg(feature = "parallel")]
mod parallel {
    use ndarray::Axis;
    use rayon::prelude::*;

    use super::*;

    impl PhaseMapApplier {
        /// Apply the phase map, resampling the spaxels in parallel.
        ///
        /// Also see [`apply`](PhaseMapApplier::apply()) for more details.
        pub fn apply_par(&self, cube: &Cube, map: &PhaseMap) -> Result<Correction> {
            let context = self.context(cube, map)?;
            info!("Applying phase map in parallel.");
            let width = cube.width();
            let lanes: Vec<ArrayView1<'_, f64>> = cube.data().lanes(Axis(0)).into_iter().collect();
            let spectra = lanes
                .into_par_iter()
                .enumerate()
                .map(|(i, spectrum)| -> Result<_> {
                    self.cancel.check()?;
                    let phase = map.value(i % width, i / width);
                    Ok(self.shift_spectrum(&context, spectrum, phase))
                })
                .collect::<Result<Vec<_>>>()?;
            self.assemble(cube, map, &context, spectra)
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;
    use crate::center::RefPixel;
    use crate::extract::PhaseMapExtractor;
    use crate::ndarray_utils::argmax;
    use crate::phasemap::PhaseMapKind;
    use crate::synthetic::AiryCube;
    use crate::wcal::CalibrationParams;

    fn constant_map(width: usize, height: usize, value: f64, sampling: f64) -> PhaseMap {
        PhaseMap::new(
            Array2::from_elem((height, width), value),
            PhaseMapKind::ParabolaFit,
            RefPixel::new(0, 0),
            24. * sampling.abs(),
            sampling,
            "bcv",
        )
        .unwrap()
    }

    fn rms(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
        (sum / a.len() as f64).sqrt()
    }

    #[test]
    fn shift_and_shift_back() {
        for sampling in [1., -0.5] {
            let cube = AiryCube::default()
                .with_shape(3, 2, 24)
                .with_curvature(0.)
                .with_sampling(sampling)
                .build()
                .unwrap();
            let applier = PhaseMapApplier::default();
            let d = 3.7 * sampling;
            let there = applier.apply(&cube, &constant_map(3, 2, d, sampling)).unwrap();
            let back = applier
                .apply(&there.cube, &constant_map(3, 2, -d, sampling))
                .unwrap();

            let original = cube.spectrum(1, 1);
            // the line moved by 3.7 channels, from 10.3 to 6.6
            assert_eq!(argmax(there.cube.spectrum(1, 1)), Some(7));
            assert!(rms(original, back.cube.spectrum(1, 1)) < 0.01);
        }
    }

    #[test]
    fn whole_channel_shift_is_exact() {
        let cube = AiryCube::default()
            .with_shape(2, 2, 24)
            .with_curvature(0.)
            .build()
            .unwrap();
        let corrected = PhaseMapApplier::default()
            .apply(&cube, &constant_map(2, 2, 5., 1.))
            .unwrap();
        for k in 0..24 {
            assert_abs_diff_eq!(
                corrected.cube.data()[[k, 0, 1]],
                cube.data()[[(k + 5) % 24, 0, 1]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn rings_are_aligned() {
        let cube = AiryCube::default()
            .with_shape(40, 40, 24)
            .with_center(20.3, 17.8)
            .with_curvature(0.02)
            .build()
            .unwrap();
        let fsr = FreeSpectralRange {
            value: 24.,
            channels: 24,
        };
        let map = PhaseMapExtractor::default()
            .extract(&cube, RefPixel::new(20, 18), fsr)
            .unwrap()
            .phase_map;
        let corrected = PhaseMapApplier::default().apply(&cube, &map).unwrap();

        assert_eq!(corrected.cube.depth(), 24);
        assert_eq!(corrected.report.failed(), 0);
        for y in 0..40 {
            for x in 0..40 {
                let peak = argmax(corrected.cube.spectrum(x, y)).unwrap();
                assert!(peak.abs_diff(10) <= 1, "({x}, {y}) peaks at {peak}");
            }
        }
    }

    #[test]
    fn centering_moves_the_line_to_the_middle() {
        let cube = AiryCube::default()
            .with_shape(4, 4, 30)
            .with_curvature(0.)
            .build()
            .unwrap();
        let corrected = PhaseMapApplier::default()
            .with_centering(true)
            .apply(&cube, &constant_map(4, 4, 0., 1.))
            .unwrap()
            .cube;

        assert_eq!(corrected.depth(), 24);
        assert_eq!(corrected.line_channel(), Some(12));
        // channel 10 moved to 12 and keeps its scan value
        assert_eq!(corrected.header().get_f64(keys::CRPIX3), Some(3.));
        assert_abs_diff_eq!(corrected.z()[12], 10.);
    }

    #[test]
    fn wavelength_solution() {
        let cube = AiryCube::default()
            .with_shape(4, 4, 24)
            .with_curvature(0.)
            .with_sampling(-0.5)
            .build()
            .unwrap();
        let mut map = constant_map(4, 4, 0., -0.5);
        map.calibration_wavelength = Some(6598.9529);
        let calibrator = WavelengthCalibrator::default().with_params(
            CalibrationParams::default()
                .with_gap(44.)
                .with_wavelength(6562.8),
        );
        let corrected = PhaseMapApplier::default()
            .with_centering(true)
            .with_calibrator(calibrator)
            .apply(&cube, &map)
            .unwrap()
            .cube;

        let header = corrected.header();
        assert_eq!(corrected.units(), WAVELENGTH_UNIT);
        assert_eq!(header.get_f64(keys::CRPIX3), Some(13.));
        assert_eq!(header.get_f64(keys::CRVAL3), Some(6562.8));
        // 48.9463 angstrom over 11.9343 scan units, at -0.5 per channel
        assert_abs_diff_eq!(corrected.sampling(), -2.05066, epsilon = 1e-4);
        assert_eq!(header.get_str(keys::PHMAPPLY), Some("parabola fit"));
        assert!(!header.history().is_empty());
    }

    #[test]
    fn missing_calibration_is_an_error() {
        let cube = AiryCube::default().with_shape(2, 2, 24).build().unwrap();
        let result = PhaseMapApplier::default()
            .with_calibrator(WavelengthCalibrator::default())
            .apply(&cube, &constant_map(2, 2, 0., 1.));
        assert!(matches!(
            result,
            Err(PipelineError::MissingCalibrationData(_))
        ));
    }

    #[test]
    fn shape_mismatch() {
        let cube = AiryCube::default().with_shape(3, 2, 24).build().unwrap();
        assert!(matches!(
            PhaseMapApplier::default().apply(&cube, &constant_map(2, 3, 0., 1.)),
            Err(PipelineError::DimensionMismatch(_))
        ));
        let short = AiryCube::default().with_shape(2, 2, 20).build().unwrap();
        assert!(matches!(
            PhaseMapApplier::default().apply(&short, &constant_map(2, 2, 0., 1.)),
            Err(PipelineError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn failed_spaxels_are_counted() {
        let (mut data, header) = AiryCube::default()
            .with_shape(3, 3, 24)
            .build()
            .unwrap()
            .into_parts();
        data[[4, 1, 1]] = f64::NAN;
        let cube = Cube::new(data, header).unwrap();
        let mut map = constant_map(3, 3, 1., 1.);
        map.data[[0, 2]] = f64::NAN;

        let corrected = PhaseMapApplier::default().apply(&cube, &map).unwrap();
        assert_eq!(corrected.report.count(SpaxelFailure::FitFailure), 1);
        assert_eq!(corrected.report.count(SpaxelFailure::AmbiguousPeak), 1);
        assert!(corrected.cube.spectrum(1, 1).iter().all(|v| v.is_nan()));
        assert!(corrected.cube.spectrum(2, 0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn cancelled_batch() {
        let cube = AiryCube::default().with_shape(2, 2, 24).build().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = PhaseMapApplier::default()
            .with_cancel_token(token)
            .apply(&cube, &constant_map(2, 2, 0., 1.));
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_matches_sequential() {
        let cube = AiryCube::default()
            .with_shape(12, 9, 24)
            .with_center(5., 4.)
            .with_curvature(0.05)
            .build()
            .unwrap();
        let mut map = constant_map(12, 9, 0., 1.);
        map.data = Array2::from_shape_fn((9, 12), |(y, x)| 0.05 * ((x * x + y * y) as f64));
        let applier = PhaseMapApplier::default();
        assert_eq!(
            applier.apply(&cube, &map).unwrap().cube.data(),
            applier.apply_par(&cube, &map).unwrap().cube.data()
        );
    }
}
