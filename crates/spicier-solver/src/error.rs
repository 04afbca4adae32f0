//! Error types for spicier-solver.
//!
//! Only unrecoverable conditions become an [`Error`]. Newton non-convergence
//! and local-error failures are reported as status values and retried by the
//! step controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix")]
    SingularMatrix,

    #[error("convergence failed after {iterations} iterations")]
    ConvergenceFailed { iterations: usize },

    #[error("invalid matrix dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{what} size mismatch: topology has {expected}, loader reports {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Load(#[from] spicier_core::Error),

    #[error("invalid sweep specification: {0}")]
    InvalidSweep(String),

    #[error("only one PARAM is allowed per .STEP line: {0}")]
    MultipleSweepParams(String),

    #[error(
        "time step too small at time {time:.6e}: step {step:.6e} is below the minimum {min_step:.6e}\n{report}"
    )]
    TimeStepTooSmall {
        time: f64,
        step: f64,
        min_step: f64,
        report: String,
    },

    #[error("constant time step integration failed at time {time:.6e}")]
    ConstantStepFailed { time: f64 },

    #[error("DC operating point failed to converge ({iterations} Newton iterations)")]
    DcopFailed { iterations: usize },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("solver error: {0}")]
    SolverError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
