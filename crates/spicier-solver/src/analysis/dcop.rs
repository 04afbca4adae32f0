//! DC operating point.

use spicier_core::Loader;

use super::base::{AnalysisBase, AnalysisConfig, AnalysisCore};
use super::{AnalysisHooks, RunContext};
use crate::error::{Error, Result};
use crate::nonlinear::NewtonOutcome;
use crate::tia::IntegrationMethodKind;

/// Gmin-stepping continuation used when the plain operating-point solve
/// fails.
///
/// A conductance `gmin` from every voltage node to ground is ramped down
/// geometrically, each rung starting from the previous rung's solution,
/// then removed for a final solve.
#[derive(Debug, Clone)]
pub struct GminStepping {
    pub enabled: bool,
    /// First conductance tried.
    pub start: f64,
    /// Largest conductance tried when the first rung fails.
    pub max: f64,
    /// Divisor between rungs.
    pub factor: f64,
    /// Below this the conductance is dropped to zero.
    pub min: f64,
    /// Smallest divisor before giving up.
    pub min_factor: f64,
    pub max_steps: usize,
}

impl Default for GminStepping {
    fn default() -> Self {
        Self {
            enabled: true,
            start: 1.0e-2,
            max: 1.0,
            factor: 10.0,
            min: 1.0e-12,
            min_factor: 1.01,
            max_steps: 100,
        }
    }
}

impl GminStepping {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Solve the operating point with the no-integration formula.
///
/// Runs twice when double DCOP is enabled, with `double_dcop_step` telling
/// loaders which pass is active. The converged solution stays in
/// `ds.next_solution`.
pub fn run_operating_point(
    core: &mut AnalysisCore,
    loader: &mut dyn Loader,
    gmin: &GminStepping,
) -> Result<NewtonOutcome> {
    core.state.enter_dcop();
    core.use_method(IntegrationMethodKind::None);
    core.use_newton_params(false);
    core.sec.next_time = core.sec.current_time;
    core.sync_state();

    let passes = if core.state.double_dcop_enabled { 2 } else { 1 };
    let mut outcome = NewtonOutcome::default();
    for pass in 0..passes {
        core.state.double_dcop_step = pass;
        core.method.update_coeffs(&mut core.ds, &mut core.sec);
        core.method.obtain_predictor(&mut core.ds, &mut core.sec);
        outcome = solve_with_continuation(core, loader, gmin)?;
        log::debug!(
            "operating point pass {} converged in {} iterations",
            pass,
            outcome.iterations
        );
    }
    Ok(outcome)
}

fn solve_with_continuation(
    core: &mut AnalysisCore,
    loader: &mut dyn Loader,
    gmin: &GminStepping,
) -> Result<NewtonOutcome> {
    let guess = core.ds.next_solution.clone();
    core.state.gmin_scale = 0.0;
    core.state.continuation_step = 0;

    let outcome = core.solve_nonlinear(loader)?;
    if outcome.converged() {
        return Ok(outcome);
    }
    let mut total_iterations = outcome.iterations;
    if !gmin.enabled {
        log::error!(
            "operating point failed: {:?} after {} iterations",
            outcome.status,
            outcome.iterations
        );
        return Err(Error::DcopFailed {
            iterations: total_iterations,
        });
    }

    log::warn!(
        "operating point failed ({:?}), trying gmin stepping",
        outcome.status
    );
    core.ds.next_solution.copy_from(&guess);
    let mut good = guess;
    let mut last_good: Option<f64> = None;
    let mut g = gmin.start;
    let mut factor = gmin.factor;

    for step in 1..=gmin.max_steps {
        core.state.continuation_step = step;
        core.state.gmin_scale = g;
        let outcome = core.solve_nonlinear(loader)?;
        total_iterations += outcome.iterations;

        if outcome.converged() {
            log::debug!("gmin {:.3e} converged in {} iterations", g, outcome.iterations);
            if g == 0.0 {
                core.state.gmin_scale = 0.0;
                core.state.continuation_step = 0;
                return Ok(NewtonOutcome {
                    iterations: total_iterations,
                    ..outcome
                });
            }
            good.copy_from(&core.ds.next_solution);
            last_good = Some(g);
            let next = g / factor;
            g = if next < gmin.min { 0.0 } else { next };
            continue;
        }

        core.ds.next_solution.copy_from(&good);
        match last_good {
            None => {
                g *= gmin.factor;
                if g > gmin.max {
                    break;
                }
            }
            Some(prev) => {
                factor = factor.sqrt();
                if factor < gmin.min_factor {
                    break;
                }
                g = prev / factor;
            }
        }
        log::debug!("gmin rung failed, retrying with {:.3e}", g);
    }

    core.state.gmin_scale = 0.0;
    core.state.continuation_step = 0;
    log::error!(
        "operating point failed after gmin stepping ({} Newton iterations)",
        total_iterations
    );
    Err(Error::DcopFailed {
        iterations: total_iterations,
    })
}

/// Stand-alone operating-point analysis.
pub struct Dcop {
    core: AnalysisCore,
    gmin: GminStepping,
    outcome: Option<NewtonOutcome>,
    failure: Option<Error>,
}

impl Dcop {
    pub fn new(loader: &dyn Loader, config: AnalysisConfig) -> Result<Self> {
        Ok(Self {
            core: AnalysisCore::new(loader, config)?,
            gmin: GminStepping::default(),
            outcome: None,
            failure: None,
        })
    }

    pub fn with_gmin_stepping(mut self, gmin: GminStepping) -> Self {
        self.gmin = gmin;
        self
    }

    pub fn core(&self) -> &AnalysisCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut AnalysisCore {
        &mut self.core
    }

    /// Outcome of the last solve.
    pub fn outcome(&self) -> Option<&NewtonOutcome> {
        self.outcome.as_ref()
    }
}

impl AnalysisHooks for Dcop {
    fn base(&self) -> &AnalysisBase {
        &self.core.stats
    }

    fn init(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        self.core.stats.reset();
        self.core.assembler.reset();
        self.outcome = None;
        self.failure = None;
        ctx.loader.set_initial_guess(&mut self.core.ds.next_solution);
        log::info!(
            "operating point: {} unknowns",
            self.core.ds.solution_size()
        );
        Ok(())
    }

    fn loop_process(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        match run_operating_point(&mut self.core, &mut *ctx.loader, &self.gmin) {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.process_successful_step(ctx)
            }
            Err(err @ Error::DcopFailed { .. }) => {
                self.failure = Some(err);
                self.process_failed_step(ctx)
            }
            Err(err) => Err(err),
        }
    }

    fn process_successful_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let core = &mut self.core;
        core.ds.set_constant_history();
        core.stats.successful_steps += 1;
        ctx.output.output_dcop(&core.ds.curr_solution);
        ctx.loader.accept_step(&core.state);
        Ok(())
    }

    fn process_failed_step(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.core.stats.failed_steps += 1;
        Err(self.failure.take().unwrap_or(Error::DcopFailed {
            iterations: self.core.stats.newton_iterations,
        }))
    }

    fn finish(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.core.stats.record_load_times(&self.core.assembler);
        log::info!(
            "operating point done: {} Newton iterations, {} residual loads",
            self.core.stats.newton_iterations,
            self.core.stats.residual_evaluations
        );
        Ok(())
    }

    fn reset_for_step_analysis(&mut self) {
        self.outcome = None;
        self.failure = None;
    }
}
