//! State shared by every analysis.

use std::time::Duration;

use spicier_core::{Loader, SolverState, SystemSizes};

use crate::assembler::{Assembler, CircuitSystem};
use crate::dispatch::LinearSolverConfig;
use crate::error::Result;
use crate::nonlinear::{DampedNewton, NewtonOutcome, NlParams};
use crate::tia::{
    DataStore, ErrorWeightOptions, IntegrationMethodKind, StepErrorControl,
    TimeIntegrationMethod, TiaParams,
};

/// Run counters accumulated over one analysis.
#[derive(Debug, Clone, Default)]
pub struct AnalysisBase {
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub jacobians: usize,
    pub factorizations: usize,
    pub linear_solves: usize,
    pub failed_linear_solves: usize,
    pub linear_iterations: usize,
    pub residual_evaluations: usize,
    pub nonlinear_failures: usize,
    pub newton_iterations: usize,
    pub residual_time: Duration,
    pub jacobian_time: Duration,
    pub linear_solve_time: Duration,
}

impl AnalysisBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one Newton solve into the counters.
    pub fn gather_step_statistics(&mut self, outcome: &NewtonOutcome) {
        self.jacobians += outcome.jacobians;
        // every Jacobian is factored once
        self.factorizations += outcome.jacobians;
        self.linear_solves += outcome.linear_solves;
        self.failed_linear_solves += outcome.failed_linear_solves;
        self.linear_iterations += outcome.linear_iterations;
        self.residual_evaluations += outcome.residual_evaluations;
        self.newton_iterations += outcome.iterations;
        self.linear_solve_time += outcome.linear_solve_time;
        if !outcome.converged() {
            self.nonlinear_failures += 1;
        }
    }

    /// Copy the load timers from the assembler.
    pub fn record_load_times(&mut self, assembler: &Assembler) {
        self.residual_time = assembler.residual_time;
        self.jacobian_time = assembler.jacobian_time;
    }

    /// Add another run's counters, e.g. one `.STEP` point.
    pub fn accumulate(&mut self, other: &AnalysisBase) {
        self.successful_steps += other.successful_steps;
        self.failed_steps += other.failed_steps;
        self.jacobians += other.jacobians;
        self.factorizations += other.factorizations;
        self.linear_solves += other.linear_solves;
        self.failed_linear_solves += other.failed_linear_solves;
        self.linear_iterations += other.linear_iterations;
        self.residual_evaluations += other.residual_evaluations;
        self.nonlinear_failures += other.nonlinear_failures;
        self.newton_iterations += other.newton_iterations;
        self.residual_time += other.residual_time;
        self.jacobian_time += other.jacobian_time;
        self.linear_solve_time += other.linear_solve_time;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Total attempted steps.
    pub fn attempted_steps(&self) -> usize {
        self.successful_steps + self.failed_steps
    }
}

/// Parameter sets for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub tia: TiaParams,
    pub nl_dc: NlParams,
    pub nl_tran: NlParams,
    pub linear: LinearSolverConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::new(TiaParams::default())
    }
}

impl AnalysisConfig {
    pub fn new(tia: TiaParams) -> Self {
        Self {
            tia,
            nl_dc: NlParams::dc(),
            nl_tran: NlParams::transient(),
            linear: LinearSolverConfig::default(),
        }
    }

    pub fn with_dc_params(mut self, params: NlParams) -> Self {
        self.nl_dc = params;
        self
    }

    pub fn with_transient_params(mut self, params: NlParams) -> Self {
        self.nl_tran = params;
        self
    }

    pub fn with_linear_solver(mut self, linear: LinearSolverConfig) -> Self {
        self.linear = linear;
        self
    }
}

/// The numeric machinery one analysis drives: vectors, step control, the
/// active integration method and the Newton solver.
pub struct AnalysisCore {
    pub tia: TiaParams,
    pub nl_dc: NlParams,
    pub nl_tran: NlParams,
    pub ds: DataStore,
    pub sec: StepErrorControl,
    pub method: Box<dyn TimeIntegrationMethod>,
    pub state: SolverState,
    pub assembler: Assembler,
    pub newton: DampedNewton,
    pub stats: AnalysisBase,
    transient_newton: bool,
}

impl AnalysisCore {
    /// Size everything from the loader.
    pub fn new(loader: &dyn Loader, config: AnalysisConfig) -> Result<Self> {
        Self::with_topology(loader.sizes(), loader, config)
    }

    /// Size everything from `topology`, which must match the loader.
    pub fn with_topology(
        topology: SystemSizes,
        loader: &dyn Loader,
        config: AnalysisConfig,
    ) -> Result<Self> {
        let AnalysisConfig {
            tia,
            nl_dc,
            nl_tran,
            linear,
        } = config;

        let mut ds =
            DataStore::initialize_data_arrays(topology, loader.sizes(), tia.effective_max_order())?;
        ds.set_device_info(loader.variable_kinds(), loader.error_mask());

        let mut state = SolverState::new();
        state.double_dcop_enabled = tia.double_dcop;

        Ok(Self {
            sec: StepErrorControl::new(&tia),
            method: IntegrationMethodKind::None.create(&tia),
            newton: DampedNewton::new(nl_dc.clone(), linear),
            tia,
            nl_dc,
            nl_tran,
            ds,
            state,
            assembler: Assembler::new(),
            stats: AnalysisBase::new(),
            transient_newton: false,
        })
    }

    /// Install a fresh integration method.
    pub fn use_method(&mut self, kind: IntegrationMethodKind) {
        if self.method.kind() != kind {
            log::debug!("switching integration method to {:?}", kind);
        }
        self.method = kind.create(&self.tia);
    }

    /// Pick the DC or the transient Newton parameters.
    pub fn use_newton_params(&mut self, transient: bool) {
        if self.transient_newton == transient {
            return;
        }
        let params = if transient {
            self.nl_tran.clone()
        } else {
            self.nl_dc.clone()
        };
        self.newton.set_params(params);
        self.transient_newton = transient;
    }

    pub fn error_weight_options(&self) -> ErrorWeightOptions {
        ErrorWeightOptions {
            rel_tol: self.tia.rel_error_tol,
            abs_tol: self.tia.abs_error_tol,
            fast_tests: self.tia.fast_tests,
            volt_zero_tol: self.tia.volt_zero_tol,
            curr_zero_tol: self.tia.curr_zero_tol,
        }
    }

    /// Newton from `ds.next_solution` with the active method.
    pub fn solve_nonlinear(&mut self, loader: &mut dyn Loader) -> Result<NewtonOutcome> {
        let mut system = CircuitSystem {
            loader,
            ds: &mut self.ds,
            sec: &self.sec,
            method: self.method.as_ref(),
            state: &mut self.state,
            assembler: &mut self.assembler,
        };
        let outcome = self.newton.solve(&mut system)?;
        self.stats.gather_step_statistics(&outcome);
        Ok(outcome)
    }

    /// One residual load at the current `next_solution`, leaving Q and F in
    /// `ds.dae`.
    pub fn load_residual(&mut self, loader: &mut dyn Loader) -> Result<()> {
        self.assembler.load_rhs(
            loader,
            &mut self.ds,
            &self.sec,
            self.method.as_ref(),
            &self.state,
        )?;
        self.stats.residual_evaluations += 1;
        Ok(())
    }

    /// Mirror the step controller's time, step and order into the flags
    /// loaders read.
    pub fn sync_state(&mut self) {
        self.state.current_time = self.sec.next_time;
        self.state.current_time_step = self.sec.current_time_step;
        self.state.current_order = self.sec.current_order;
    }

    /// Fresh step control and zeroed vectors for another run.
    pub fn reset_run(&mut self) {
        self.sec.reset_all(&self.tia);
        self.ds.set_zero_history();
        self.assembler.reset();
        self.stats.reset();
        self.state.gmin_scale = 0.0;
        self.state.continuation_step = 0;
        self.state.newton_iter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonlinear::NewtonStatus;

    #[test]
    fn statistics_accumulate() {
        let mut base = AnalysisBase::new();
        let ok = NewtonOutcome {
            status: NewtonStatus::Converged,
            iterations: 3,
            jacobians: 3,
            linear_solves: 3,
            residual_evaluations: 4,
            ..Default::default()
        };
        let bad = NewtonOutcome {
            status: NewtonStatus::TooManySteps,
            iterations: 20,
            jacobians: 20,
            linear_solves: 20,
            failed_linear_solves: 1,
            residual_evaluations: 21,
            ..Default::default()
        };
        base.gather_step_statistics(&ok);
        base.gather_step_statistics(&bad);
        assert_eq!(base.newton_iterations, 23);
        assert_eq!(base.jacobians, 23);
        assert_eq!(base.residual_evaluations, 25);
        assert_eq!(base.nonlinear_failures, 1);
        assert_eq!(base.failed_linear_solves, 1);

        let mut total = AnalysisBase::new();
        total.accumulate(&base);
        total.accumulate(&base);
        assert_eq!(total.newton_iterations, 46);

        base.reset();
        assert_eq!(base.newton_iterations, 0);
        assert_eq!(base.attempted_steps(), 0);
    }
}
