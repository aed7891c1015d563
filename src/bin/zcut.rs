//! Keep a range of channels of a cube.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use samfp::cli::{self, CommonArgs};
use samfp::{Result, io};

/// Cut a cube along the spectral axis
#[derive(Parser, Debug)]
#[command(name = "zcut", version, about, long_about = None)]
struct Args {
    /// Input cube
    input: PathBuf,

    #[command(flatten)]
    common: CommonArgs,

    /// First channel kept
    #[arg(short, long, default_value_t = 0)]
    begin: usize,

    /// End of the kept channels, exclusive; zero or negative values count from the end
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    end: isize,
}

fn run(args: &Args) -> Result<()> {
    let cube = io::read_cube(&args.input)?;
    let cut = cube.zcut(args.begin, args.end)?;
    info!("Kept {} of {} channels.", cut.depth(), cube.depth());

    let output = args.common.output_for(&args.input, "--zcut");
    io::write_cube(&output, &cut)?;
    info!("Cube written to {}.", output.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.common.init_logging();
    cli::finish("zcut", run(&args))
}
