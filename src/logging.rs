//! Terminal logging for the stage binaries.
//!
//! The library only talks to the `log` facade; a binary picks a [`Verbosity`] once and
//! installs a `simplelog` terminal logger configured for it.

use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, Config, ConfigBuilder, TermLogger, TerminalMode, ThreadLogMode};

/// How much a stage reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    /// Stage progress.
    #[default]
    Normal,
    /// Iteration detail, with module and thread of every record.
    Debug,
}

impl Verbosity {
    /// Verbosity selected by the `-q` and `-d` flags; `-d` wins.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        match (quiet, debug) {
            (_, true) => Verbosity::Debug,
            (true, false) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    /// Most verbose level that is printed.
    pub fn level(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Warn,
            Verbosity::Normal => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }

    /// Record format.
    pub fn config(&self) -> Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_level(LevelFilter::Off);
        match self {
            Verbosity::Quiet | Verbosity::Normal => {
                builder
                    .set_target_level(LevelFilter::Off)
                    .set_thread_level(LevelFilter::Off);
            }
            Verbosity::Debug => {
                builder
                    .set_time_level(LevelFilter::Error)
                    .set_target_level(LevelFilter::Error)
                    .set_thread_level(LevelFilter::Error)
                    .set_thread_mode(ThreadLogMode::IDs);
            }
        }
        builder.build()
    }
}

/// Install the terminal logger. Fails if a logger is already installed.
pub fn init(verbosity: Verbosity) -> Result<(), SetLoggerError> {
    TermLogger::init(
        verbosity.level(),
        verbosity.config(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Debug);
        assert_eq!(Verbosity::Quiet.level(), LevelFilter::Warn);
        assert_eq!(Verbosity::Debug.level(), LevelFilter::Debug);
    }
}
