//! Damped Newton iteration for `F(x) = 0`.
//!
//! The solver only sees a [`NonlinearProblem`]; for circuits that is the
//! [`CircuitSystem`](crate::assembler::CircuitSystem) built around the
//! assembler and the active integration method.

mod constraint;
mod damped_newton;
mod params;
mod status;

pub use constraint::ConstraintBt;
pub use damped_newton::DampedNewton;
pub use params::{NlParams, NlStrategy, SearchMethod};
pub use status::{NewtonOutcome, NewtonStatus};

use nalgebra::DVector;
use spicier_core::DaeMatrix;

use crate::error::Result;

/// A system the Newton solver can drive.
///
/// `rhs()` is the negated residual at `solution()` as of the last
/// `load_rhs()`; `jacobian()` is its derivative as of the last
/// `load_jacobian()`.
pub trait NonlinearProblem {
    fn size(&self) -> usize;

    fn solution(&self) -> &DVector<f64>;

    fn solution_mut(&mut self) -> &mut DVector<f64>;

    /// Told the iteration number before each iteration (0 for the initial
    /// residual).
    fn set_iteration(&mut self, _iteration: usize) {}

    fn load_rhs(&mut self) -> Result<()>;

    fn rhs(&self) -> &DVector<f64>;

    /// Requires a preceding `load_rhs()` at the same solution.
    fn load_jacobian(&mut self) -> Result<()>;

    fn jacobian(&self) -> &DaeMatrix;

    /// Inverse weights `1 / (rel·|x_i| + abs)` for the update norm.
    fn weights(&self, rel_tol: f64, abs_tol: f64) -> DVector<f64> {
        self.solution().map(|x| 1.0 / (rel_tol * x.abs() + abs_tol))
    }
}
