//! Transient analysis.
//!
//! Starting from the operating point (or the loader's initial guess), each
//! pass of the loop picks the stop time from the breakpoint list,
//! restarts the integration history when needed, predicts, solves with
//! Newton and lets the step controller accept or reject the attempt.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};

use spicier_core::Loader;

use super::base::{AnalysisBase, AnalysisConfig, AnalysisCore};
use super::dcop::{GminStepping, run_operating_point};
use super::{AnalysisHooks, RunContext};
use crate::error::{Error, Result};
use crate::nonlinear::NewtonOutcome;
use crate::tia::IntegrationMethodKind;

/// Diagnostics for one rejected step attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedStep {
    /// Time the attempt started from.
    pub time: f64,
    pub step: f64,
    pub order: usize,
    pub est_over_tol: f64,
    pub newton_status: i32,
    pub newton_iterations: usize,
    pub max_norm_f: f64,
    pub max_norm_f_index: usize,
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t = {:.9e}  h = {:.3e}  order {}  est/tol {:.3e}  newton {} ({} its)  max |F| {:.3e} at {}",
            self.time,
            self.step,
            self.order,
            self.est_over_tol,
            self.newton_status,
            self.newton_iterations,
            self.max_norm_f,
            self.max_norm_f_index
        )
    }
}

/// Smallest error estimate seen among the failures since the last
/// accepted step.
#[derive(Debug, Clone, Copy)]
struct MinEstimate {
    est_over_tol: f64,
    step: f64,
}

/// Time-domain analysis from `initial_time` to `final_time`.
pub struct Transient {
    core: AnalysisCore,
    gmin: GminStepping,
    begin_integration: bool,
    step_number: usize,
    last_outcome: NewtonOutcome,
    dcop_outcome: Option<NewtonOutcome>,
    min_est: Option<MinEstimate>,
    recovery_left: usize,
    failed_history: VecDeque<FailedStep>,
    output_index: usize,
}

impl Transient {
    pub fn new(loader: &dyn Loader, config: AnalysisConfig) -> Result<Self> {
        let core = AnalysisCore::new(loader, config)?;
        let recovery_left = core.tia.min_time_step_recovery_counter;
        Ok(Self {
            core,
            gmin: GminStepping::default(),
            begin_integration: true,
            step_number: 0,
            last_outcome: NewtonOutcome::default(),
            dcop_outcome: None,
            min_est: None,
            recovery_left,
            failed_history: VecDeque::new(),
            output_index: 0,
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

    /// Accepted steps so far.
    pub fn step_number(&self) -> usize {
        self.step_number
    }

    /// Recent rejected attempts, oldest first.
    pub fn failed_history(&self) -> &VecDeque<FailedStep> {
        &self.failed_history
    }

    /// Outcome of the operating point that started the run.
    pub fn dcop_outcome(&self) -> Option<&NewtonOutcome> {
        self.dcop_outcome.as_ref()
    }

    /// Predict, solve and evaluate one step attempt.
    fn take_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        self.handle_predictor()?;

        let core = &mut self.core;
        core.sync_state();
        let outcome = core.solve_nonlinear(&mut *ctx.loader)?;
        core.sec.newton_convergence_status = outcome.status.code();
        core.sec.n_iterations = outcome.iterations;
        core.ds.step_linear_combo();

        let AnalysisCore { ds, sec, method, .. } = core;
        sec.evaluate_step_error(self.step_number, self.begin_integration, |sec| {
            method.compute_error_estimate(ds, sec)
        });
        self.last_outcome = outcome;
        Ok(())
    }

    /// Forgive a stalled Newton solve once the step cannot shrink further.
    fn pass_nl_stall(&self) -> bool {
        let sec = &self.core.sec;
        let pass = self.core.tia.pass_nl_stall
            && !sec.step_attempt_status
            && sec.current_time_step < 4.0 * sec.min_time_step
            && self.last_outcome.status.is_stall();
        if pass {
            log::warn!(
                "accepting stalled Newton solve at t = {:.6e} (h = {:.3e})",
                sec.next_time,
                sec.current_time_step
            );
        }
        pass
    }

    /// Retake the step with the smallest error estimate and accept it.
    fn retake_and_accept(&mut self, ctx: &mut RunContext<'_>, step: f64) -> Result<()> {
        let core = &mut self.core;
        core.sec.set_time_step(step);
        core.method.update_coeffs(&mut core.ds, &mut core.sec);
        self.take_step(ctx)?;
        if !self.last_outcome.converged() {
            return Err(self.step_too_small());
        }
        self.core.sec.step_attempt_status = true;
        self.process_successful_step(ctx)
    }

    fn step_too_small(&self) -> Error {
        let sec = &self.core.sec;
        let report = self.failure_report();
        log::error!(
            "time step too small at t = {:.6e} after {} accepted steps",
            sec.current_time,
            self.step_number
        );
        Error::TimeStepTooSmall {
            time: sec.current_time,
            step: sec.current_time_step,
            min_step: sec.min_time_step,
            report,
        }
    }

    /// The queued failure diagnostics, oldest first.
    pub fn failure_report(&self) -> String {
        let mut report = format!("last {} rejected steps:", self.failed_history.len());
        for failure in &self.failed_history {
            let _ = write!(report, "\n  {}", failure);
        }
        report
    }

    fn next_output_time(&self, interval: f64) -> f64 {
        let tia = &self.core.tia;
        tia.output_start_time.max(tia.initial_time) + self.output_index as f64 * interval
    }

    /// Write the accepted point, or every fixed-interval time it passed.
    fn output_step(&mut self, ctx: &mut RunContext<'_>) {
        let t = self.core.sec.current_time;
        let interval = self.core.tia.output_interval.filter(|dt| *dt > 0.0);
        let Some(dt) = interval else {
            if t >= self.core.tia.output_start_time {
                let ds = &self.core.ds;
                ctx.output
                    .output_tran(t, &ds.curr_solution, &ds.curr_state, &ds.curr_store);
            }
            return;
        };

        let fuzz = 100.0 * f64::EPSILON * (t.abs() + dt);
        loop {
            let target = self.next_output_time(dt);
            if target > t + fuzz || target > self.core.sec.final_time + fuzz {
                break;
            }
            let core = &self.core;
            let solution = if (target - t).abs() <= fuzz {
                Some(core.ds.curr_solution.clone())
            } else {
                core.method.interpolate_solution(&core.ds, &core.sec, target)
            };
            match solution {
                Some(solution) => ctx.output.output_tran(
                    target,
                    &solution,
                    &core.ds.curr_state,
                    &core.ds.curr_store,
                ),
                None => log::debug!("no interpolant for output time {:.6e}", target),
            }
            self.output_index += 1;
        }
    }
}

impl AnalysisHooks for Transient {
    fn base(&self) -> &AnalysisBase {
        &self.core.stats
    }

    fn init(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        self.core.reset_run();
        self.reset_for_step_analysis();

        let core = &mut self.core;
        ctx.loader.set_initial_guess(&mut core.ds.next_solution);
        if core.tia.no_dcop {
            core.state.enter_dcop();
            core.use_method(IntegrationMethodKind::None);
            core.method.update_coeffs(&mut core.ds, &mut core.sec);
            core.sync_state();
            core.load_residual(&mut *ctx.loader)?;
        } else {
            let outcome = run_operating_point(core, &mut *ctx.loader, &self.gmin)?;
            self.dcop_outcome = Some(outcome);
        }
        core.ds.set_constant_history();
        if self.dcop_outcome.is_some() {
            ctx.output.output_dcop(&core.ds.curr_solution);
        }

        core.state.enter_transient();
        core.use_method(core.tia.integration_method);
        core.use_newton_params(true);
        core.state.begin_integration = true;
        core.state.init_tran_flag = true;
        core.sec.step_attempt_status = true;
        self.begin_integration = true;

        log::info!(
            "transient {} from {:.6e} to {:.6e}, {} unknowns",
            core.method.name(),
            core.sec.initial_time,
            core.sec.final_time,
            core.ds.solution_size()
        );

        if core.tia.output_start_time <= core.tia.initial_time {
            let ds = &core.ds;
            ctx.output.output_tran(
                core.sec.current_time,
                &ds.curr_solution,
                &ds.curr_state,
                &ds.curr_store,
            );
            if core.tia.output_interval.is_some() {
                self.output_index = 1;
            }
        }
        Ok(())
    }

    fn loop_process(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        while !self.core.sec.finished() {
            let core = &mut self.core;
            core.sec.update_min_time_step();
            let breakpoints = if core.tia.bp_enable {
                ctx.loader
                    .breakpoints(core.sec.current_time, core.sec.final_time)
            } else {
                Vec::new()
            };
            core.sec.update_breakpoints(breakpoints);

            let restart = self.begin_integration && core.sec.step_attempt_status;
            core.sec.update_stop_time(restart);
            if restart {
                core.sec.update_max_time_step(None);
                let opts = core.error_weight_options();
                core.ds.set_error_wt_vector(&opts);
                core.method.initialize(&mut core.ds, &mut core.sec);
                log::debug!(
                    "integration (re)started at t = {:.6e}, h = {:.3e}, stop at {:.6e}",
                    core.sec.current_time,
                    core.sec.current_time_step,
                    core.sec.stop_time
                );
            }
            core.method.update_coeffs(&mut core.ds, &mut core.sec);

            self.take_step(ctx)?;

            if self.core.sec.step_attempt_status || self.pass_nl_stall() {
                self.core.sec.step_attempt_status = true;
                self.process_successful_step(ctx)?;
            } else {
                self.process_failed_step(ctx)?;
            }
        }
        Ok(())
    }

    fn handle_predictor(&mut self) -> Result<()> {
        let core = &mut self.core;
        let opts = core.error_weight_options();
        core.ds.set_error_wt_vector(&opts);
        core.method.obtain_predictor(&mut core.ds, &mut core.sec);
        Ok(())
    }

    fn process_successful_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let core = &mut self.core;
        core.method.complete_step(&mut core.ds, &mut core.sec);
        core.ds.update_sol_data_arrays();

        core.stats.successful_steps += 1;
        self.step_number += 1;
        core.sec.number_successive_failures = core.sec.number_successive_failures.saturating_sub(1);

        self.begin_integration = core.sec.at_breakpoint();
        core.state.begin_integration = self.begin_integration;
        core.state.init_tran_flag = false;
        if self.begin_integration {
            log::debug!("breakpoint reached at t = {:.6e}", core.sec.current_time);
        }

        self.output_step(ctx);
        self.min_est = None;
        ctx.loader.accept_step(&self.core.state);
        Ok(())
    }

    fn process_failed_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let core = &mut self.core;
        let sec = &core.sec;
        self.failed_history.push_back(FailedStep {
            time: sec.current_time,
            step: sec.current_time_step,
            order: sec.current_order,
            est_over_tol: sec.est_over_tol,
            newton_status: sec.newton_convergence_status,
            newton_iterations: sec.n_iterations,
            max_norm_f: self.last_outcome.max_norm_f,
            max_norm_f_index: self.last_outcome.max_norm_f_index,
        });
        while self.failed_history.len() > core.tia.history_tracking_depth {
            self.failed_history.pop_front();
        }

        let est = sec.est_over_tol;
        if self.min_est.is_none_or(|m| est < m.est_over_tol) {
            self.min_est = Some(MinEstimate {
                est_over_tol: est,
                step: sec.current_time_step,
            });
        }

        core.method.reject_step(&mut core.ds, &mut core.sec);
        core.stats.failed_steps += 1;
        core.sec.number_successive_failures += 1;

        if core.sec.current_time_step <= core.sec.min_time_step {
            if self.recovery_left > 0 {
                self.recovery_left -= 1;
                let retry = self
                    .min_est
                    .map_or(core.sec.current_time_step, |m| m.step);
                log::warn!(
                    "time step too small; retaking and accepting h = {:.3e} (est/tol {:.3e})",
                    retry,
                    self.min_est.map_or(f64::NAN, |m| m.est_over_tol)
                );
                return self.retake_and_accept(ctx, retry);
            }
            return Err(self.step_too_small());
        }

        if core.sec.constant_step_size {
            let time = core.sec.current_time;
            log::error!(
                "Newton failed in constant step mode at t = {:.6e}\n{}",
                time,
                self.failure_report()
            );
            return Err(Error::ConstantStepFailed { time });
        }
        Ok(())
    }

    fn finish(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        let core = &mut self.core;
        core.stats.record_load_times(&core.assembler);
        log::info!(
            "transient done at t = {:.6e}: {} accepted, {} rejected steps, {} Newton iterations",
            core.sec.current_time,
            core.stats.successful_steps,
            core.stats.failed_steps,
            core.stats.newton_iterations
        );
        Ok(())
    }

    fn reset_for_step_analysis(&mut self) {
        self.begin_integration = true;
        self.step_number = 0;
        self.last_outcome = NewtonOutcome::default();
        self.dcop_outcome = None;
        self.min_est = None;
        self.recovery_left = self.core.tia.min_time_step_recovery_counter;
        self.failed_history.clear();
        self.output_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::output::RecordingOutput;
    use crate::analysis::testing::{Attempt, RcLoader};
    use crate::tia::TiaParams;

    fn run(
        loader: &mut RcLoader,
        tia: TiaParams,
    ) -> (Result<()>, Transient, RecordingOutput) {
        let mut tran = Transient::new(&*loader, AnalysisConfig::new(tia)).unwrap();
        let mut out = RecordingOutput::new();
        let result = {
            let mut ctx = RunContext::new(loader, &mut out);
            tran.run(&mut ctx)
        };
        (result, tran, out)
    }

    fn charging(method: IntegrationMethodKind) {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0);
        let mut tia = TiaParams::transient(5.0).with_method(method);
        tia.no_dcop = true;
        let (result, tran, out) = run(&mut loader, tia);
        result.unwrap();

        let v = out.points.last().unwrap().solution[0];
        let expected = 1.0 - (-5.0f64).exp();
        assert!(
            (v - expected).abs() < 5e-3,
            "{:?}: v(5) = {} expected {}",
            method,
            v,
            expected
        );
        assert!((out.points.last().unwrap().time - 5.0).abs() < 1e-12);
        assert!(tran.step_number() > 10);
        assert_eq!(tran.base().successful_steps, tran.step_number());
    }

    #[test]
    fn bdf_tracks_rc_charging() {
        charging(IntegrationMethodKind::Bdf);
    }

    #[test]
    fn trapezoidal_tracks_rc_charging() {
        charging(IntegrationMethodKind::Trapezoidal);
    }

    fn assert_order_walk(attempts: &[Attempt], min_order: usize, max_order: usize) {
        let mut reached_min = false;
        for pair in attempts.windows(2) {
            let (a, b) = (pair[0].order, pair[1].order);
            assert!(a.abs_diff(b) <= 1, "order jumped {} -> {} at t = {}", a, b, pair[1].time);
        }
        for a in attempts {
            assert!(a.order >= 1 && a.order <= max_order, "order {} at t = {}", a.order, a.time);
            if reached_min {
                assert!(a.order >= min_order, "fell to order {} at t = {}", a.order, a.time);
            }
            reached_min |= a.order >= min_order;
        }
        assert!(reached_min, "never reached order {}", min_order);
    }

    #[test]
    fn bdf_order_stays_in_range() {
        for (min_order, max_order) in [(1, 5), (2, 5), (3, 4)] {
            let mut loader = RcLoader::new(1.0, 1.0, 1.0);
            let mut tia = TiaParams::transient(5.0).with_order_range(min_order, max_order);
            tia.no_dcop = true;
            let (result, _, out) = run(&mut loader, tia);
            result.unwrap_or_else(|e| panic!("orders {}..{}: {}", min_order, max_order, e));

            let v = out.points.last().unwrap().solution[0];
            assert!((v - (1.0 - (-5.0f64).exp())).abs() < 5e-3);
            assert_eq!(loader.attempts[0].order, 1);
            assert_order_walk(&loader.attempts, min_order, max_order);
        }
    }

    #[test]
    fn trapezoidal_order_stays_in_range() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0).with_breakpoints(vec![2.0]);
        let mut tia = TiaParams::transient(4.0).with_method(IntegrationMethodKind::Trapezoidal);
        tia.no_dcop = true;
        let (result, _, _) = run(&mut loader, tia);
        result.unwrap();
        assert_order_walk(&loader.attempts, 1, 2);
    }

    #[test]
    fn operating_point_starts_flat() {
        let mut loader = RcLoader::new(1.0, 1.0, 2.0);
        let (result, tran, out) = run(&mut loader, TiaParams::transient(1.0));
        result.unwrap();
        assert!(tran.dcop_outcome().is_some());
        let dcop = out.dcop.as_ref().unwrap();
        assert!((dcop[0] - 2.0).abs() < 1e-9);
        for p in &out.points {
            assert!((p.solution[0] - 2.0).abs() < 1e-6, "drifted at {}", p.time);
        }
    }

    #[test]
    fn lands_on_breakpoint_and_restarts_at_order_one() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0).with_breakpoints(vec![5.0]);
        let mut tia = TiaParams::transient(10.0);
        tia.no_dcop = true;
        let (result, _, out) = run(&mut loader, tia);
        result.unwrap();

        assert!(
            out.times().iter().any(|t| (t - 5.0).abs() < 1e-12),
            "no output at the breakpoint"
        );
        let after = loader
            .attempts
            .iter()
            .find(|a| a.time > 5.0)
            .expect("steps after the breakpoint");
        assert_eq!(after.order, 1);
        assert!((after.time - after.step - 5.0).abs() < 1e-12);
    }

    #[test]
    fn fixed_interval_output() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0);
        let mut tia = TiaParams::transient(2.0).with_output_interval(0.5);
        tia.no_dcop = true;
        let (result, _, out) = run(&mut loader, tia);
        result.unwrap();

        assert_eq!(out.times(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        for p in &out.points {
            let expected = 1.0 - (-p.time).exp();
            assert!(
                (p.solution[0] - expected).abs() < 1e-2,
                "t = {}: {} vs {}",
                p.time,
                p.solution[0],
                expected
            );
        }
    }

    #[test]
    fn rejected_steps_shrink() {
        // an unannounced source edge forces local error failures
        let mut loader = RcLoader::new(1.0, 1.0, 1.0).with_source_step(1.0);
        let mut tia = TiaParams::transient(3.0);
        tia.no_dcop = true;
        let (result, tran, _) = run(&mut loader, tia);
        result.unwrap();

        assert!(tran.base().failed_steps > 0);
        let mut rejections = 0;
        for pair in loader.attempts.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let start_a = a.time - a.step;
            let start_b = b.time - b.step;
            if (start_a - start_b).abs() <= 1e-15 * start_a.abs().max(1.0) {
                rejections += 1;
                assert!(b.step < a.step, "retry {} not below {}", b.step, a.step);
            }
        }
        assert!(rejections > 0);
    }

    #[test]
    fn step_floor_is_fatal_with_report() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0)
            .with_breakpoints(vec![1.0])
            .failing_after(1.0);
        let mut tia = TiaParams::transient(2.0);
        tia.no_dcop = true;
        tia.history_tracking_depth = 5;
        let (result, tran, _) = run(&mut loader, tia);

        match result {
            Err(Error::TimeStepTooSmall { time, report, .. }) => {
                assert_eq!(time, 1.0);
                assert_eq!(report.lines().count(), 6, "{}", report);
                assert!(report.contains("newton -2"), "{}", report);
            }
            other => panic!("expected a step-size failure, got {:?}", other.err()),
        }
        assert_eq!(tran.failed_history().len(), 5);
    }

    #[test]
    fn failing_first_step_stops_at_run_scaled_floor() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0).failing_after(-1.0);
        let mut tia = TiaParams::transient(5.0);
        tia.no_dcop = true;
        let (result, _, _) = run(&mut loader, tia);

        match result {
            Err(Error::TimeStepTooSmall {
                time, step, min_step, ..
            }) => {
                assert_eq!(time, 0.0);
                assert!((min_step - 50.0 * f64::EPSILON).abs() < 1e-28, "{}", min_step);
                assert!(step > 0.0);
            }
            other => panic!("expected a step-size failure, got {:?}", other.err()),
        }
        assert!(loader.attempts.len() < 100, "{} attempts", loader.attempts.len());
    }

    #[test]
    fn constant_step_failure_is_fatal() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0).failing_after(0.25);
        let mut tia = TiaParams::transient(1.0).with_constant_step(0.1);
        tia.no_dcop = true;
        let (result, tran, _) = run(&mut loader, tia);
        assert!(matches!(result, Err(Error::ConstantStepFailed { .. })));
        assert!(tran.core().sec.current_time <= 0.25);
    }
}
