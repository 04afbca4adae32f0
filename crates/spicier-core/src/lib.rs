//! Core types for the Spicier time-integration engine.
//!
//! This crate defines the boundary between device models and the solver:
//! - [`Loader`] - capability interface implemented by circuits
//! - [`DaeMatrix`], [`DaeVectors`], [`DaeMatrices`] - DAE system storage
//! - [`SolverState`] - analysis mode flags read by loaders

pub mod dae;
pub mod error;
pub mod loader;
pub mod solver_state;

pub use dae::{DaeMatrices, DaeMatrix, DaeVectors};
pub use error::{Error, Result};
pub use loader::{LoadVectors, Loader, SystemSizes, VariableKind};
pub use solver_state::{AnalysisMode, SolverState};
