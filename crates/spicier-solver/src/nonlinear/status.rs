//! Newton solve outcomes.

use std::time::Duration;

/// Result of one Newton solve.
///
/// Each variant maps to a signed code: positive codes are successes and the
/// step controller treats anything else as a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewtonStatus {
    /// Still iterating.
    #[default]
    NotYet,
    /// Update and residual both inside tolerance.
    Converged,
    /// The update became negligible with the residual at its floor.
    ConvergedSmallUpdate,
    /// Iteration limit reached.
    TooManySteps,
    /// Residual or update blew up (non-finite or huge).
    UpdateTooBig,
    /// The update stopped shrinking while the residual stayed large.
    Stalled,
    /// The linear solve failed (singular Jacobian or solver breakdown).
    LinearSolveFailed,
}

impl NewtonStatus {
    /// Signed status code.
    pub fn code(&self) -> i32 {
        match self {
            NewtonStatus::Converged => 2,
            NewtonStatus::ConvergedSmallUpdate => 3,
            NewtonStatus::NotYet => 0,
            NewtonStatus::TooManySteps => -1,
            NewtonStatus::UpdateTooBig => -2,
            NewtonStatus::Stalled => -3,
            NewtonStatus::LinearSolveFailed => -4,
        }
    }

    #[inline]
    pub fn is_converged(&self) -> bool {
        self.code() > 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, NewtonStatus::NotYet)
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        !self.is_active() && !self.is_converged()
    }

    /// Failures that a "pass stalled Newton" option may forgive.
    #[inline]
    pub fn is_stall(&self) -> bool {
        matches!(self, NewtonStatus::Stalled | NewtonStatus::UpdateTooBig)
    }
}

/// Statistics reported by a Newton solve.
#[derive(Debug, Clone, Default)]
pub struct NewtonOutcome {
    pub status: NewtonStatus,
    pub iterations: usize,
    /// Residual 2-norm at the final iterate.
    pub norm_rhs: f64,
    /// Largest residual component and its row.
    pub max_norm_f: f64,
    pub max_norm_f_index: usize,
    /// Weighted norm of the last update.
    pub wt_norm_dx: f64,
    pub jacobians: usize,
    pub residual_evaluations: usize,
    pub linear_solves: usize,
    pub failed_linear_solves: usize,
    pub linear_iterations: usize,
    pub linear_solve_time: Duration,
}

impl NewtonOutcome {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}
