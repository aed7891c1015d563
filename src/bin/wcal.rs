//! Convert the BCV spectral axis of a cube to wavelength.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use samfp::cli::{self, CommonArgs};
use samfp::{CalibrationParams, Result, WavelengthCalibrator, io};

/// Write a linear wavelength solution for a scan calibrated in BCV
#[derive(Parser, Debug)]
#[command(name = "wcal", version, about, long_about = None)]
struct Args {
    /// Input cube
    input: PathBuf,

    #[command(flatten)]
    common: CommonArgs,

    /// Nominal etalon gap in microns (default: FPGAP)
    #[arg(long)]
    gap: Option<f64>,

    /// Observed wavelength in angstrom (default: FPWOBS)
    #[arg(long)]
    wavelength: Option<f64>,

    /// Wavelength of the calibration line in angstrom (default: PHMWCAL)
    #[arg(long)]
    calibration_wavelength: Option<f64>,

    /// Free spectral range in BCV (default: PHM_FSR)
    #[arg(long)]
    fsr: Option<f64>,
}

fn run(args: &Args) -> Result<()> {
    let cube = io::read_cube(&args.input)?;
    let params = CalibrationParams {
        gap: args.gap,
        wavelength: args.wavelength,
        calibration_wavelength: args.calibration_wavelength,
        fsr: args.fsr,
    };
    let calibrated = WavelengthCalibrator::default()
        .with_params(params)
        .calibrate(&cube)?;

    let output = args.common.output_for(&args.input, "--wcal");
    io::write_cube(&output, &calibrated)?;
    info!("Calibrated cube written to {}.", output.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.common.init_logging();
    cli::finish("wcal", run(&args))
}
