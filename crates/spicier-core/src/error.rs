//! Error types for spicier-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("loader failure: {0}")]
    LoadFailed(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
