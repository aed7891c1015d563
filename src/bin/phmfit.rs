//! Fit the radial model to an observed phase map.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use samfp::cli::{self, CommonArgs};
use samfp::{Concavity, PhaseMapFitter, Result, io};

/// Replace an observed phase map by a radial parabola
#[derive(Parser, Debug)]
#[command(name = "phmfit", version, about, long_about = None)]
struct Args {
    /// Observed phase map
    input: PathBuf,

    #[command(flatten)]
    common: CommonArgs,

    /// Samples along each axis
    #[arg(long, default_value_t = 50)]
    npoints: usize,

    /// Concavity of the phase, `rising` or `falling` (default: detected)
    #[arg(long)]
    concavity: Option<Concavity>,

    /// Residual map (default: derived from the input name)
    #[arg(long)]
    residual: Option<PathBuf>,
}

fn run(args: &Args) -> Result<()> {
    let observed = io::read_phase_map(&args.input)?;
    let mut fitter = PhaseMapFitter::default().with_grid_points(args.npoints);
    if let Some(concavity) = args.concavity {
        fitter = fitter.with_concavity(concavity);
    }
    let outcome = fitter.fit(&observed)?;

    let fit_path = args.common.output_for(&args.input, "--fit_phmap");
    io::write_phase_map(&fit_path, &outcome.fitted)?;
    info!("Fitted phase map written to {}.", fit_path.display());
    let residual_path = args
        .residual
        .clone()
        .unwrap_or_else(|| io::derived_path(&args.input, "--res_phmap"));
    io::write_phase_map(&residual_path, &outcome.residual)?;
    info!("Residual map written to {}.", residual_path.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.common.init_logging();
    cli::finish("phmfit", run(&args))
}
