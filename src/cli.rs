//! Arguments and exit handling shared by the stage binaries.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use log::{error, info};

use crate::error::Result;
use crate::io::derived_path;
use crate::logging::{self, Verbosity};

/// Flags every stage accepts.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Output file (default: derived from the input name)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Print debug output
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,

    /// Process spaxels on a single thread
    #[arg(long, default_value_t = false)]
    pub serial: bool,
}

impl CommonArgs {
    /// Verbosity selected by the flags.
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.debug)
    }

    /// Install the terminal logger.
    pub fn init_logging(&self) {
        if let Err(e) = logging::init(self.verbosity()) {
            eprintln!("logger already installed: {e}");
        }
    }

    /// The `--output` path, or `input` with `suffix` appended to its stem.
    pub fn output_for(&self, input: &Path, suffix: &str) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| derived_path(input, suffix))
    }

    /// Whether the `_par` variants should be used.
    pub fn parallel(&self) -> bool {
        cfg!(feature = "parallel") && !self.serial
    }
}

/// Log the outcome of a stage and turn it into an exit status.
pub fn finish(stage: &str, result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => {
            info!("{stage} done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{stage} failed: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestArgs {
        input: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn default_output_is_derived() {
        let args = TestArgs::parse_from(["stage", "data/scan.fits", "-q"]);
        assert_eq!(args.common.verbosity(), Verbosity::Quiet);
        assert_eq!(
            args.common.output_for(&args.input, "--fit"),
            PathBuf::from("data/scan--fit.fits")
        );

        let args = TestArgs::parse_from(["stage", "scan.fits", "-o", "out.fits", "-d"]);
        assert_eq!(args.common.verbosity(), Verbosity::Debug);
        assert_eq!(
            args.common.output_for(&args.input, "--fit"),
            PathBuf::from("out.fits")
        );
    }

    #[test]
    fn failure_exit_status() {
        assert_eq!(finish("test", Ok(())), ExitCode::SUCCESS);
        assert_eq!(
            finish("test", Err(crate::PipelineError::FsrUndetermined)),
            ExitCode::FAILURE
        );
    }
}
