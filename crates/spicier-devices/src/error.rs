//! Error types for spicier-devices.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate element name '{0}'")]
    DuplicateName(String),

    #[error("element '{name}' has invalid value {value}")]
    InvalidValue { name: String, value: f64 },

    #[error("circuit has no nodes besides ground")]
    EmptyCircuit,

    #[error("node '{0}' has only one connection")]
    DanglingNode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
