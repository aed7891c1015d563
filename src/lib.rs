#![warn(missing_docs)]

//! Phase-map extraction and correction for scanning Fabry-Perot data cubes, as taken with SAM-FP. \
//! A raw scanning cube holds one frame per etalon gap setting. The ring geometry of the
//! interference pattern shifts every spaxel's spectrum by an amount that grows with the distance
//! to the optical axis. This crate measures that shift (the *phase map*), models it and removes it,
//! so the cube can be given a single wavelength solution.
//!
//! ## Interface
//! Every stage is a small configuration struct built with `Default` and adjusted via `with_*()`
//! functions, then applied to a [`Cube`]:
//!
//! 1. [`FsrEstimator`] measures the free spectral range of the etalon from the data.
//! 2. [`RingCenterLocator`] finds the ring center, which becomes the reference pixel.
//! 3. [`FinesseEstimator`] measures the line width of the reference spectrum.
//! 4. [`PhaseMapExtractor`] builds the observed [`PhaseMap`].
//! 5. [`PhaseMapFitter`] replaces it by a radial parabola.
//! 6. [`PhaseMapApplier`] resamples every spaxel and writes the wavelength solution.
//! 7. [`WavelengthCalibrator`] converts a BCV sampling into angstrom.
//!
//! Example:
//! ```no_run
//! use samfp::{io, FsrEstimator, PhaseMapExtractor, RingCenterLocator};
//!
//! let cube = io::read_cube("scan.fits")?;
//! let fsr = FsrEstimator::default().estimate(&cube)?;
//! let center = RingCenterLocator::default().locate(&cube, fsr.channels)?;
//! let extraction = PhaseMapExtractor::default().extract(&cube, center.ref_pixel(), fsr)?;
//! io::write_phase_map("scan--obs_phmap.fits", &extraction.phase_map)?;
//! # Ok::<(), samfp::PipelineError>(())
//! ```
//!
//! The per-spaxel stages (center finding, extraction and resampling) also have `_par` variants
//! running on a `rayon` thread pool when the `parallel` feature is enabled (default).
//! Spaxels where a peak or a profile fit cannot be found are set to NaN and counted in a
//! [`BatchReport`] instead of aborting the run.

pub mod apply;
pub mod batch;
pub mod center;
pub mod cli;
pub mod cube;
pub mod error;
pub mod extract;
pub mod finesse;
pub mod fit;
pub mod fsr;
pub mod header;
pub mod io;
pub(crate) mod lm;
pub mod logging;
pub(crate) mod ndarray_utils;
pub mod peaks;
pub mod phasemap;
pub(crate) mod polyfit;
pub(crate) mod spline;
pub mod synthetic;
pub mod unwrap;
pub mod wcal;
pub mod wcs;

pub use apply::{Correction, PhaseMapApplier};
pub use batch::{BatchReport, CancelToken, SpaxelFailure};
pub use center::{NonConvergencePolicy, RefPixel, RingCenter, RingCenterLocator};
pub use cube::Cube;
pub use error::{PipelineError, Result};
pub use extract::{Extraction, PhaseMapExtractor, ReferenceSpectrum};
pub use finesse::{FinesseEstimate, FinesseEstimator, LineProfile, ProfileFit};
pub use fit::{Concavity, FitOutcome, PhaseMapFitter};
pub use fsr::{FreeSpectralRange, FsrEstimator};
pub use header::{Header, HeaderValue};
pub use peaks::{PeakFinder, TieBreak};
pub use phasemap::{PhaseMap, PhaseMapKind};
pub use polyfit::Parabola;
pub use wcal::{CalibrationParams, WavelengthCalibrator};

/// A generic float trait for the array helpers shared by all stages.
///
/// This trait is automatically implemented for all types implementing the supertraits.
/// Particularly, this includes `f32` and `f64`.
pub trait Float: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}

impl<F> Float for F where F: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}
