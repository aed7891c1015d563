//! Remove a phase map from a scanning cube and calibrate it in wavelength.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use samfp::cli::{self, CommonArgs};
use samfp::header::keys;
use samfp::{CalibrationParams, PhaseMapApplier, Result, WavelengthCalibrator, io};

/// Resample every spectrum of a cube onto the phase of the reference pixel
#[derive(Parser, Debug)]
#[command(name = "phmapply", version, about, long_about = None)]
struct Args {
    /// Input scanning cube
    input: PathBuf,

    /// Phase map, observed or fitted
    phase_map: PathBuf,

    #[command(flatten)]
    common: CommonArgs,

    /// Sub-channel points of the resampling
    #[arg(long, default_value_t = 10)]
    oversample: usize,

    /// Move the line to the middle channel
    #[arg(long, default_value_t = false)]
    center: bool,

    /// Keep the scan axis instead of writing a wavelength solution
    #[arg(long, default_value_t = false)]
    keep_axis: bool,

    /// Nominal etalon gap in microns (default: FPGAP)
    #[arg(long)]
    gap: Option<f64>,

    /// Observed wavelength in angstrom (default: FPWOBS)
    #[arg(long)]
    wavelength: Option<f64>,

    /// Free spectral range in scan units (default: from the phase map)
    #[arg(long)]
    fsr: Option<f64>,
}

fn run(args: &Args) -> Result<()> {
    let cube = io::read_cube(&args.input)?;
    let map = io::read_phase_map(&args.phase_map)?;

    let mut applier = PhaseMapApplier::default()
        .with_oversample(args.oversample)
        .with_centering(args.center);
    if !args.keep_axis {
        let params = CalibrationParams {
            gap: args.gap,
            wavelength: args.wavelength,
            calibration_wavelength: None,
            fsr: args.fsr,
        };
        applier = applier.with_calibrator(WavelengthCalibrator::default().with_params(params));
    }
    let mut correction = if args.common.parallel() {
        apply_par(&applier, &cube, &map)?
    } else {
        applier.apply(&cube, &map)?
    };

    let map_name = args.phase_map.display().to_string();
    let header = correction.cube.header_mut();
    header.set(keys::PHMAPPLY, map_name.as_str());
    header.add_history(format!("phmapply: {} applied to {}", map_name, args.input.display()));

    let output = args.common.output_for(&args.input, "--corrected");
    io::write_cube(&output, &correction.cube)?;
    info!("Corrected cube written to {}.", output.display());
    Ok(())
}

#[cfg(feature = "parallel")]
fn apply_par(
    applier: &PhaseMapApplier,
    cube: &samfp::Cube,
    map: &samfp::PhaseMap,
) -> Result<samfp::apply::Correction> {
    applier.apply_par(cube, map)
}

#[cfg(not(feature = "parallel"))]
fn apply_par(
    applier: &PhaseMapApplier,
    cube: &samfp::Cube,
    map: &samfp::PhaseMap,
) -> Result<samfp::apply::Correction> {
    applier.apply(cube, map)
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.common.init_logging();
    cli::finish("phmapply", run(&args))
}
