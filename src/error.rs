//! Stage-level errors.
//!
//! Anything in here aborts the stage that raised it. Failures that only concern a single spaxel
//! are not errors; see [`SpaxelFailure`](crate::batch::SpaxelFailure).

use thiserror::Error;

/// Errors raised by the pipeline stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A calibration value is neither configured nor present in the header.
    #[error("missing required calibration parameter `{0}`; supply it explicitly")]
    MissingCalibrationData(String),

    /// Array shapes do not fit together.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An iterative estimator ran out of iterations.
    #[error("{stage} did not converge within {iterations} iterations")]
    ConvergenceFailure {
        /// Name of the estimator.
        stage: &'static str,
        /// Iterations spent.
        iterations: usize,
    },

    /// The difference curve has no usable minimum.
    #[error("free spectral range could not be determined automatically; supply it explicitly")]
    FsrUndetermined,

    /// The free spectral range covers too few channels to extract a phase map.
    #[error("free spectral range spans {channels} channels, at least {minimum} are required")]
    InsufficientFsr {
        /// Measured channels per FSR.
        channels: usize,
        /// Required minimum.
        minimum: usize,
    },

    /// Rising and falling phase steps are too balanced to tell the curvature of the phase map.
    #[error(
        "phase map concavity is ambiguous ({rising} rising vs {falling} falling steps); configure it explicitly"
    )]
    AmbiguousConcavity {
        /// Number of small positive steps.
        rising: usize,
        /// Number of small negative steps.
        falling: usize,
    },

    /// A least-squares problem had no usable solution.
    #[error("degenerate fit: {0}")]
    DegenerateFit(String),

    /// Finesse at or below one.
    #[error("finesse {0:.3} is not physical (must exceed 1)")]
    UnphysicalFinesse(f64),

    /// The batch was cancelled through its [`CancelToken`](crate::batch::CancelToken).
    #[error("batch cancelled")]
    Cancelled,

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A FITS file does not hold what the stage expects.
    #[error("invalid FITS data: {0}")]
    InvalidData(String),
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
