//! Time integration and nonlinear solve core for Spicier.
//!
//! The pieces, bottom up:
//! - [`linear`], [`gmres`], [`dispatch`] - linear solvers and their selection
//! - [`tia`] - the data store, step/order control and the integration formulas
//! - [`assembler`] - builds residual and Jacobian from a [`spicier_core::Loader`]
//! - [`nonlinear`] - damped Newton with line searches and constraint backtracking
//! - [`analysis`] - DC operating point, transient and `.STEP` drivers
//! - [`options`] - serde option block feeding all of the above

pub mod analysis;
pub mod assembler;
pub mod dispatch;
pub mod error;
pub mod gmres;
pub mod linear;
pub mod nonlinear;
pub mod operator;
pub mod options;
pub mod preconditioner;
pub mod sparse_operator;
pub mod tia;

pub use analysis::{
    Analysis, AnalysisBase, AnalysisConfig, AnalysisHooks, AnalysisKind, Dcop, GminStepping,
    MainAnalysis, NullOutput, OutputSink, RecordingOutput, RunContext, Simulation, Step,
    StepResult, SweepKind, SweepParam, TimePoint, Transient,
};
pub use assembler::{Assembler, CircuitSystem};
pub use dispatch::{LinearSolverConfig, LinearSolverKind};
pub use error::{Error, Result};
pub use gmres::{GmresConfig, GmresSolver};
pub use linear::{DenseLu, LinearSolveReport, LinearSolver, SPARSE_THRESHOLD, SparseLu};
pub use nonlinear::{DampedNewton, NewtonOutcome, NewtonStatus, NlParams, NlStrategy, SearchMethod};
pub use options::{NewtonOptions, SimulationOptions};
pub use tia::{
    DataStore, IntegrationMethodKind, StepErrorControl, TiaParams, TimeIntegrationMethod,
};
