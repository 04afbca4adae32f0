//! Analysis mode flags shared with loaders.
//!
//! Analyses are the only writers of [`SolverState`]. Loaders receive it by
//! shared reference during every residual and Jacobian evaluation.

/// Which analysis is currently driving the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// DC operating point.
    #[default]
    DcOp,
    /// Transient time stepping.
    Transient,
}

/// Process-wide solver mode flags and continuation counters.
#[derive(Debug, Clone, Default)]
pub struct SolverState {
    /// Current analysis mode.
    pub mode: AnalysisMode,
    /// Solving the DC operating point.
    pub dcop_flag: bool,
    /// Integrating in time.
    pub transient_flag: bool,
    /// AC operating point (reserved for small-signal analyses).
    pub acop_flag: bool,
    /// Multi-time PDE mode (reserved).
    pub mpde_on_flag: bool,
    /// First transient step after the operating point.
    pub init_tran_flag: bool,
    /// History was just (re)started: after DCOP or at a breakpoint.
    pub begin_integration: bool,
    /// Run the operating point twice (PDE devices).
    pub double_dcop_enabled: bool,
    /// Which double-DCOP pass is active (0 = nonlinear Poisson, 1 = full).
    pub double_dcop_step: usize,
    /// Time being solved for.
    pub current_time: f64,
    /// Step size being attempted.
    pub current_time_step: f64,
    /// Integration order being attempted.
    pub current_order: usize,
    /// Newton iteration counter within the current solve.
    pub newton_iter: usize,
    /// Continuation step within a gmin-stepping ladder.
    pub continuation_step: usize,
    /// Artificial conductance added to every node during gmin stepping.
    pub gmin_scale: f64,
    /// Index of the current `.STEP` sweep point.
    pub step_loop_iter: usize,
}

impl SolverState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the first pass of a double DCOP is running.
    pub fn first_double_dcop_step(&self) -> bool {
        self.double_dcop_enabled && self.double_dcop_step == 0
    }

    /// Switch flags for an operating-point solve.
    pub fn enter_dcop(&mut self) {
        self.mode = AnalysisMode::DcOp;
        self.dcop_flag = true;
        self.transient_flag = false;
        self.current_order = 0;
    }

    /// Switch flags for time integration.
    pub fn enter_transient(&mut self) {
        self.mode = AnalysisMode::Transient;
        self.dcop_flag = false;
        self.transient_flag = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_dcop_pass_flag() {
        let mut state = SolverState::new();
        assert!(!state.first_double_dcop_step());
        state.double_dcop_enabled = true;
        assert!(state.first_double_dcop_step());
        state.double_dcop_step = 1;
        assert!(!state.first_double_dcop_step());
    }

    #[test]
    fn mode_switches() {
        let mut state = SolverState::new();
        state.enter_transient();
        assert!(state.transient_flag && !state.dcop_flag);
        assert_eq!(state.mode, AnalysisMode::Transient);
        state.enter_dcop();
        assert!(state.dcop_flag && !state.transient_flag);
    }
}
