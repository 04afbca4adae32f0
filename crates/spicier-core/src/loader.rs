//! Device loader capability interface.
//!
//! A [`Loader`] evaluates device physics. Given the solution, state and store
//! vectors it fills the DAE vectors Q and F and their Jacobians. The solver
//! core never sees concrete device types.

use nalgebra::DVector;

use crate::dae::{DaeMatrices, DaeVectors};
use crate::error::{Error, Result};
use crate::solver_state::SolverState;

/// Lengths of the solution, state and store vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemSizes {
    /// Number of circuit unknowns.
    pub solution: usize,
    /// Number of device internal state quantities.
    pub state: usize,
    /// Number of auxiliary store quantities (lead currents and the like).
    pub store: usize,
}

impl SystemSizes {
    pub fn new(solution: usize, state: usize, store: usize) -> Self {
        Self {
            solution,
            state,
            store,
        }
    }
}

/// Physical meaning of a solution variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Node voltage.
    Voltage,
    /// Branch current.
    Current,
}

/// Borrowed view of the time-labelled vectors handed to a loader.
///
/// Only the `next` state and store vectors may be written.
pub struct LoadVectors<'a> {
    pub next_solution: &'a DVector<f64>,
    pub curr_solution: &'a DVector<f64>,
    pub last_solution: &'a DVector<f64>,
    pub next_state: &'a mut DVector<f64>,
    pub curr_state: &'a DVector<f64>,
    pub last_state: &'a DVector<f64>,
    pub next_state_deriv: &'a DVector<f64>,
    pub next_store: &'a mut DVector<f64>,
    pub curr_store: &'a DVector<f64>,
    pub last_store: &'a DVector<f64>,
    pub next_store_lead_curr_q: &'a mut DVector<f64>,
}

/// Device-physics collaborator consumed by the assembler.
pub trait Loader {
    /// Vector lengths this loader expects.
    fn sizes(&self) -> SystemSizes;

    /// Refresh device internal state from the trial solution.
    fn update_state(&mut self, vecs: &mut LoadVectors<'_>, state: &SolverState) -> Result<()>;

    /// Accumulate Q, F and the voltage-limiting corrections into `out`.
    ///
    /// `out` has been zeroed by the caller.
    fn load_dae_vectors(
        &mut self,
        vecs: &mut LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeVectors,
    ) -> Result<()>;

    /// Accumulate dQ/dx and dF/dx into `out`.
    ///
    /// Must only be called after [`Loader::load_dae_vectors`] for the same
    /// trial solution.
    fn load_dae_matrices(
        &mut self,
        vecs: &LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeMatrices,
    ) -> Result<()>;

    /// Apply dQ/dx and dF/dx to `input` without handing the matrices out.
    fn apply_dae_matrices(
        &mut self,
        vecs: &LoadVectors<'_>,
        state: &SolverState,
        input: &DVector<f64>,
        dqdx_v: &mut DVector<f64>,
        dfdx_v: &mut DVector<f64>,
    ) -> Result<()> {
        let mut mats = DaeMatrices::new(input.len());
        self.load_dae_matrices(vecs, state, &mut mats)?;
        *dqdx_v = mats.dqdx.mul_vec(input);
        *dfdx_v = mats.dfdx.mul_vec(input);
        Ok(())
    }

    /// Discontinuity times in `(start, end]` the integrator must land on.
    fn breakpoints(&self, _start: f64, _end: f64) -> Vec<f64> {
        Vec::new()
    }

    /// Kind of every solution variable, used by the fast error tests.
    fn variable_kinds(&self) -> Vec<VariableKind> {
        vec![VariableKind::Voltage; self.sizes().solution]
    }

    /// Rows to leave out of error norms (`false` = excluded).
    fn error_mask(&self) -> Option<Vec<bool>> {
        None
    }

    /// Whether devices apply voltage limiting and report `dVp` corrections.
    fn limiter_enabled(&self) -> bool {
        false
    }

    /// Seed the solution before the first Newton solve.
    fn set_initial_guess(&mut self, _solution: &mut DVector<f64>) {}

    /// Change a named circuit parameter (used by parameter sweeps).
    fn set_param(&mut self, name: &str, _value: f64) -> Result<()> {
        Err(Error::UnknownParameter(name.to_string()))
    }

    /// Notification that the current step was accepted.
    fn accept_step(&mut self, _state: &SolverState) {}
}
