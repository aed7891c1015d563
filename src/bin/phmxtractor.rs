//! Extract the observed phase map of a scanning cube.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use samfp::cli::{self, CommonArgs};
use samfp::{
    FreeSpectralRange, FsrEstimator, PhaseMapExtractor, RefPixel, Result, RingCenterLocator, io,
};

/// Measure free spectral range, ring center and phase map of a Fabry-Perot scan
#[derive(Parser, Debug)]
#[command(name = "phmxtractor", version, about, long_about = None)]
struct Args {
    /// Input scanning cube
    input: PathBuf,

    #[command(flatten)]
    common: CommonArgs,

    /// Free spectral range in spectral units (default: measured)
    #[arg(long, allow_negative_numbers = true)]
    fsr: Option<f64>,

    /// Reference pixel column (default: header, else ring center)
    #[arg(long, requires = "ref_y")]
    ref_x: Option<usize>,

    /// Reference pixel row (default: header, else ring center)
    #[arg(long, requires = "ref_x")]
    ref_y: Option<usize>,

    /// Subtract the continuum of every spectrum before the peak search
    #[arg(long, default_value_t = false)]
    continuum: bool,

    /// Ignore samples below mean plus standard deviation of every spectrum
    #[arg(long, default_value_t = false)]
    threshold: bool,

    /// Wavelength of the calibration line in angstrom
    #[arg(long)]
    wavelength: Option<f64>,
}

fn run(args: &Args) -> Result<()> {
    let cube = io::read_cube(&args.input)?;
    info!(
        "{}: {} x {} x {} {}.",
        args.input.display(),
        cube.width(),
        cube.height(),
        cube.depth(),
        cube.units()
    );

    let fsr = match args.fsr {
        Some(value) => FreeSpectralRange::from_value(value, cube.sampling())?,
        None => FsrEstimator::default().estimate(&cube)?,
    };

    let locator = RingCenterLocator::default();
    let ref_pixel = match (args.ref_x, args.ref_y) {
        (Some(x), Some(y)) => RefPixel::new(x, y),
        _ if args.common.parallel() => match RefPixel::from_header(cube.header()) {
            Some(ref_pixel) => ref_pixel,
            None => locate_par(&locator, &cube, fsr.channels)?,
        },
        // header value first, then the ring center
        _ => locator.resolve(&cube, fsr.channels)?,
    };
    info!("Reference pixel ({}, {}).", ref_pixel.x, ref_pixel.y);

    let mut extractor = PhaseMapExtractor::default()
        .with_continuum_subtraction(args.continuum)
        .with_threshold(args.threshold);
    if let Some(wavelength) = args.wavelength {
        extractor = extractor.with_calibration_wavelength(wavelength);
    }
    let mut extraction = if args.common.parallel() {
        extract_par(&extractor, &cube, ref_pixel, fsr)?
    } else {
        extractor.extract(&cube, ref_pixel, fsr)?
    };
    extraction.phase_map.source = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    let map_path = args.common.output_for(&args.input, "--obs_phmap");
    io::write_phase_map(&map_path, &extraction.phase_map)?;
    info!("Phase map written to {}.", map_path.display());
    let spectrum_path = io::derived_path(&args.input, "--ref_spec");
    io::write_spectrum(&spectrum_path, &extraction.reference)?;
    info!("Reference spectrum written to {}.", spectrum_path.display());
    Ok(())
}

#[cfg(feature = "parallel")]
fn locate_par(locator: &RingCenterLocator, cube: &samfp::Cube, fsr: usize) -> Result<RefPixel> {
    Ok(locator.locate_par(cube, fsr)?.ref_pixel())
}

#[cfg(not(feature = "parallel"))]
fn locate_par(locator: &RingCenterLocator, cube: &samfp::Cube, fsr: usize) -> Result<RefPixel> {
    Ok(locator.locate(cube, fsr)?.ref_pixel())
}

#[cfg(feature = "parallel")]
fn extract_par(
    extractor: &PhaseMapExtractor,
    cube: &samfp::Cube,
    ref_pixel: RefPixel,
    fsr: FreeSpectralRange,
) -> Result<samfp::Extraction> {
    extractor.extract_par(cube, ref_pixel, fsr)
}

#[cfg(not(feature = "parallel"))]
fn extract_par(
    extractor: &PhaseMapExtractor,
    cube: &samfp::Cube,
    ref_pixel: RefPixel,
    fsr: FreeSpectralRange,
) -> Result<samfp::Extraction> {
    extractor.extract(cube, ref_pixel, fsr)
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.common.init_logging();
    cli::finish("phmxtractor", run(&args))
}
