//! Damped Newton solver.
//!
//! One call to [`DampedNewton::solve`] runs the iteration to convergence or
//! failure and reports a [`NewtonOutcome`]. It never retries on its own:
//! deciding what to do after a failure (shrink the step, continue in gmin)
//! belongs to the caller.

use std::time::Instant;

use nalgebra::DVector;

use super::constraint::ConstraintBt;
use super::params::{NlParams, NlStrategy, SearchMethod};
use super::status::{NewtonOutcome, NewtonStatus};
use super::NonlinearProblem;
use crate::dispatch::LinearSolverConfig;
use crate::error::Result;
use crate::linear::LinearSolver;

/// Sufficient-decrease constant for the line searches.
const ARMIJO_ALPHA: f64 = 1.0e-4;

/// Eisenstat-Walker choice 2 constants.
const EW_GAMMA: f64 = 0.9;
const EW_ALPHA: f64 = 2.0;
const ETA_MIN: f64 = 1.0e-6;
const ETA_MAX: f64 = 0.9;

/// Consecutive non-decreasing residuals that count as a stall.
const STALL_WINDOW: usize = 5;

/// Residual norm treated as a blow-up.
const NORM_BLOWUP: f64 = 1.0e100;

/// Damped Newton with optional line search, bound constraints and
/// Jacobian reuse.
pub struct DampedNewton {
    params: NlParams,
    linear_config: LinearSolverConfig,
    linear: Option<(usize, Box<dyn LinearSolver>)>,
    constraint: ConstraintBt,
    eta: f64,
    bank_rose_k: f64,
}

impl DampedNewton {
    pub fn new(params: NlParams, linear_config: LinearSolverConfig) -> Self {
        let constraint = ConstraintBt::new(
            params.global_bt_min,
            params.global_bt_max,
            params.global_bt_change,
        );
        let eta = params.eta;
        Self {
            params,
            linear_config,
            linear: None,
            constraint,
            eta,
            bank_rose_k: 0.0,
        }
    }

    pub fn params(&self) -> &NlParams {
        &self.params
    }

    /// Swap parameter sets, e.g. between the DC and transient presets.
    pub fn set_params(&mut self, params: NlParams) {
        self.constraint = ConstraintBt::new(
            params.global_bt_min,
            params.global_bt_max,
            params.global_bt_change,
        );
        self.params = params;
    }

    /// Current forcing term.
    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Solve from the problem's current solution.
    ///
    /// `Err` only for loader failures; non-convergence is reported through
    /// the outcome status.
    pub fn solve(&mut self, problem: &mut dyn NonlinearProblem) -> Result<NewtonOutcome> {
        let n = problem.size();
        let mut linear = match self.linear.take() {
            Some((size, solver)) if size == n => solver,
            _ => self.linear_config.create(n),
        };
        let mut out = NewtonOutcome::default();
        let result = self.iterate(problem, linear.as_mut(), &mut out);
        self.linear = Some((n, linear));
        result?;

        log::debug!(
            "newton finished: {:?} after {} iterations, |F| = {:.3e}",
            out.status,
            out.iterations,
            out.norm_rhs
        );
        Ok(out)
    }

    fn iterate(
        &mut self,
        problem: &mut dyn NonlinearProblem,
        linear: &mut dyn LinearSolver,
        out: &mut NewtonOutcome,
    ) -> Result<()> {
        self.eta = self.params.eta;
        self.bank_rose_k = 0.0;
        self.constraint.reset();

        problem.set_iteration(0);
        problem.load_rhs()?;
        out.residual_evaluations += 1;
        let mut norm_rhs = rhs_norms(problem.rhs(), out);
        if !norm_rhs.is_finite() {
            out.status = NewtonStatus::UpdateTooBig;
            return Ok(());
        }
        if self.params.min_iterations == 0 && norm_rhs <= self.params.rhs_tol {
            out.status = NewtonStatus::Converged;
            return Ok(());
        }

        let mut need_jacobian = true;
        let mut prev_norm = norm_rhs;
        let mut stall_count = 0;

        for iter in 1..=self.params.max_newton_step {
            out.iterations = iter;
            problem.set_iteration(iter);

            let Some(mut dx) = self.newton_step(problem, linear, need_jacobian, out)? else {
                out.status = NewtonStatus::LinearSolveFailed;
                return Ok(());
            };
            if dx.iter().any(|v| !v.is_finite()) {
                out.status = NewtonStatus::UpdateTooBig;
                return Ok(());
            }

            let weights = problem.weights(self.params.rel_tol, self.params.abs_tol);
            self.constrain(problem.solution(), &mut dx);
            let lambda = self.update_x(problem, &dx, norm_rhs, out)?;
            norm_rhs = rhs_norms(problem.rhs(), out);
            let wt_norm_dx = wrms(&(&dx * lambda), &weights);
            out.wt_norm_dx = wt_norm_dx;

            log::debug!(
                "newton {}: |F| = {:.3e}, |dx|_w = {:.3e}, step length {:.3}",
                iter,
                norm_rhs,
                wt_norm_dx,
                lambda
            );

            let status = self.converged(iter, norm_rhs, wt_norm_dx, lambda);
            if status != NewtonStatus::NotYet {
                out.status = status;
                return Ok(());
            }

            if norm_rhs >= 0.99 * prev_norm {
                stall_count += 1;
                if stall_count >= STALL_WINDOW {
                    out.status = NewtonStatus::Stalled;
                    return Ok(());
                }
            } else {
                stall_count = 0;
            }

            if self.params.forcing_flag {
                self.set_forcing(norm_rhs, prev_norm);
            }
            need_jacobian = self.eval_mod_newton(norm_rhs, prev_norm);
            prev_norm = norm_rhs;
        }

        out.status = NewtonStatus::TooManySteps;
        Ok(())
    }

    /// Solve `J·dx = rhs`, refactoring when asked to. `None` when the
    /// linear solve fails.
    fn newton_step(
        &mut self,
        problem: &mut dyn NonlinearProblem,
        linear: &mut dyn LinearSolver,
        need_jacobian: bool,
        out: &mut NewtonOutcome,
    ) -> Result<Option<DVector<f64>>> {
        if need_jacobian || !linear.is_factored() {
            problem.load_jacobian()?;
            out.jacobians += 1;
            if let Err(e) = linear.factor(problem.jacobian()) {
                log::debug!("jacobian factorization failed: {}", e);
                out.failed_linear_solves += 1;
                return Ok(None);
            }
        }

        let tol = if self.params.forcing_flag { self.eta } else { 0.0 };
        let start = Instant::now();
        let report = linear.solve(problem.rhs(), tol);
        out.linear_solve_time += start.elapsed();
        out.linear_solves += 1;
        match report {
            Ok(report) => {
                out.linear_iterations += report.iterations;
                Ok(Some(report.solution))
            }
            Err(e) => {
                log::debug!("linear solve failed: {}", e);
                out.failed_linear_solves += 1;
                Ok(None)
            }
        }
    }

    /// Scale or clip the direction to respect the solution bounds.
    fn constrain(&mut self, x: &DVector<f64>, dx: &mut DVector<f64>) {
        if self.params.constraint_bt {
            let theta = self.constraint.step_scale(x, dx);
            if theta < 1.0 {
                *dx *= theta;
            }
        }
        if self.params.search_method == SearchMethod::SpiceNewton {
            let cap = self.params.spice_vlimit;
            dx.apply(|d| *d = d.clamp(-cap, cap));
        }
    }

    /// Move the solution along `dx` and leave the residual loaded at the
    /// new point. Returns the step length taken.
    fn update_x(
        &mut self,
        problem: &mut dyn NonlinearProblem,
        dx: &DVector<f64>,
        norm0: f64,
        out: &mut NewtonOutcome,
    ) -> Result<f64> {
        let x0 = problem.solution().clone();
        let max_trials = self.params.max_search_step.max(1);

        let mut trial = |problem: &mut dyn NonlinearProblem, lambda: f64| -> Result<f64> {
            *problem.solution_mut() = &x0 + dx * lambda;
            problem.load_rhs()?;
            out.residual_evaluations += 1;
            Ok(problem.rhs().norm())
        };

        match self.params.search_method {
            SearchMethod::Full | SearchMethod::SpiceNewton => {
                trial(&mut *problem, 1.0)?;
                Ok(1.0)
            }
            SearchMethod::Divide => {
                let mut lambda = 1.0;
                for k in 0..max_trials {
                    let norm = trial(&mut *problem, lambda)?;
                    if norm < norm0 || k + 1 == max_trials {
                        break;
                    }
                    lambda *= 0.5;
                }
                Ok(lambda)
            }
            SearchMethod::Backtrack | SearchMethod::SimpleBacktrack => {
                let quadratic = self.params.search_method == SearchMethod::Backtrack;
                let mut lambda = 1.0;
                for k in 0..max_trials {
                    let norm = trial(&mut *problem, lambda)?;
                    if self.sufficient_decrease(norm, norm0, lambda) || k + 1 == max_trials {
                        break;
                    }
                    lambda = if quadratic {
                        let f0 = norm0 * norm0;
                        let model = f0 * lambda * lambda / (norm * norm - f0 + 2.0 * f0 * lambda);
                        model.clamp(self.params.bt_lower * lambda, self.params.bt_upper * lambda)
                    } else {
                        self.params.bt_upper * lambda
                    };
                }
                Ok(lambda)
            }
            SearchMethod::BankRose => {
                let mut lambda = 1.0;
                for k in 0..max_trials {
                    lambda = 1.0 / (1.0 + self.bank_rose_k * norm0);
                    let norm = trial(&mut *problem, lambda)?;
                    let decrease = (1.0 - norm / norm0) / lambda;
                    if decrease >= self.params.bt_lower || norm <= self.params.rhs_tol {
                        self.bank_rose_k *= 0.1;
                        break;
                    }
                    if k + 1 == max_trials {
                        break;
                    }
                    self.bank_rose_k = if self.bank_rose_k == 0.0 {
                        1.0
                    } else {
                        10.0 * self.bank_rose_k
                    };
                }
                Ok(lambda)
            }
        }
    }

    fn sufficient_decrease(&self, norm: f64, norm0: f64, lambda: f64) -> bool {
        norm <= (1.0 - ARMIJO_ALPHA * lambda) * norm0 || norm <= self.params.rhs_tol
    }

    fn converged(&self, iter: usize, norm_rhs: f64, wt_norm_dx: f64, lambda: f64) -> NewtonStatus {
        if !norm_rhs.is_finite() || norm_rhs > NORM_BLOWUP || !wt_norm_dx.is_finite() {
            return NewtonStatus::UpdateTooBig;
        }
        if iter < self.params.min_iterations {
            return NewtonStatus::NotYet;
        }
        if wt_norm_dx <= self.params.delta_x_tol && norm_rhs <= self.params.rhs_tol {
            return NewtonStatus::Converged;
        }
        if wt_norm_dx <= self.params.small_update_tol {
            return if lambda >= 1.0 {
                NewtonStatus::ConvergedSmallUpdate
            } else {
                NewtonStatus::Stalled
            };
        }
        NewtonStatus::NotYet
    }

    /// Eisenstat-Walker choice 2 with the usual safeguard.
    fn set_forcing(&mut self, norm: f64, prev_norm: f64) {
        if prev_norm <= 0.0 {
            return;
        }
        let mut eta = EW_GAMMA * (norm / prev_norm).powf(EW_ALPHA);
        let safeguard = EW_GAMMA * self.eta.powf(EW_ALPHA);
        if safeguard > 0.1 {
            eta = eta.max(safeguard);
        }
        self.eta = eta.clamp(ETA_MIN, ETA_MAX);
    }

    /// Whether the next iteration needs a fresh Jacobian.
    fn eval_mod_newton(&self, norm: f64, prev_norm: f64) -> bool {
        match self.params.strategy {
            NlStrategy::Newton => true,
            NlStrategy::ModifiedNewton => {
                prev_norm <= 0.0 || norm / prev_norm > self.params.mod_newton_refactor_ratio
            }
        }
    }
}

/// Residual 2-norm; records the largest component in `out`.
fn rhs_norms(rhs: &DVector<f64>, out: &mut NewtonOutcome) -> f64 {
    let (index, max) = rhs
        .iter()
        .map(|v| v.abs())
        .enumerate()
        .fold((0, 0.0_f64), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });
    out.max_norm_f = max;
    out.max_norm_f_index = index;
    out.norm_rhs = rhs.norm();
    out.norm_rhs
}

fn wrms(v: &DVector<f64>, w: &DVector<f64>) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().zip(w.iter()).map(|(a, b)| (a * b).powi(2)).sum();
    (sum / v.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LinearSolverKind;
    use nalgebra::dvector;
    use spicier_core::DaeMatrix;

    /// Componentwise `g(x_i) = 0` with a diagonal Jacobian.
    struct Scalar {
        x: DVector<f64>,
        rhs: DVector<f64>,
        jac: DaeMatrix,
        g: fn(f64) -> f64,
        dg: fn(f64) -> f64,
        jacobian_loads: usize,
    }

    impl Scalar {
        fn new(x: DVector<f64>, g: fn(f64) -> f64, dg: fn(f64) -> f64) -> Self {
            let n = x.len();
            Self {
                x,
                rhs: DVector::zeros(n),
                jac: DaeMatrix::new(n),
                g,
                dg,
                jacobian_loads: 0,
            }
        }
    }

    impl NonlinearProblem for Scalar {
        fn size(&self) -> usize {
            self.x.len()
        }
        fn solution(&self) -> &DVector<f64> {
            &self.x
        }
        fn solution_mut(&mut self) -> &mut DVector<f64> {
            &mut self.x
        }
        fn load_rhs(&mut self) -> Result<()> {
            self.rhs = self.x.map(|v| -(self.g)(v));
            Ok(())
        }
        fn rhs(&self) -> &DVector<f64> {
            &self.rhs
        }
        fn load_jacobian(&mut self) -> Result<()> {
            self.jacobian_loads += 1;
            self.jac.clear();
            for i in 0..self.x.len() {
                self.jac.add(i, i, (self.dg)(self.x[i]));
            }
            Ok(())
        }
        fn jacobian(&self) -> &DaeMatrix {
            &self.jac
        }
    }

    fn square_minus_four(x: f64) -> f64 {
        x * x - 4.0
    }

    fn two_x(x: f64) -> f64 {
        2.0 * x
    }

    fn newton(params: NlParams) -> DampedNewton {
        DampedNewton::new(params, LinearSolverConfig::default())
    }

    #[test]
    fn converges_on_quadratic() {
        let mut p = Scalar::new(dvector![3.0, 1.0], square_minus_four, two_x);
        let out = newton(NlParams::dc()).solve(&mut p).unwrap();
        assert!(out.converged(), "status {:?}", out.status);
        assert!(out.iterations < 12, "took {} iterations", out.iterations);
        assert!((p.x[0] - 2.0).abs() < 1e-6);
        assert!((p.x[1] - 2.0).abs() < 1e-6);
        assert_eq!(out.jacobians, out.iterations);
    }

    #[test]
    fn converged_start_takes_at_most_one_iteration() {
        let mut p = Scalar::new(dvector![2.0], square_minus_four, two_x);
        let out = newton(NlParams::dc()).solve(&mut p).unwrap();
        assert!(out.converged());
        assert_eq!(out.iterations, 1);
        assert_eq!(p.x[0], 2.0);

        let mut params = NlParams::dc();
        params.min_iterations = 0;
        let out = newton(params).solve(&mut p).unwrap();
        assert!(out.converged());
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn residual_tolerance_is_absolute() {
        fn g(x: f64) -> f64 {
            1.0e3 * (x * x - 4.0)
        }
        fn dg(x: f64) -> f64 {
            2.0e3 * x
        }
        // the first update is already inside the weighted update tolerance,
        // but the residual is not yet below rhs_tol
        let mut p = Scalar::new(dvector![2.0001], g, dg);
        let out = newton(NlParams::dc()).solve(&mut p).unwrap();
        assert!(out.converged(), "status {:?}", out.status);
        assert_eq!(out.iterations, 2);
        assert!(out.norm_rhs <= NlParams::dc().rhs_tol);
    }

    #[test]
    fn singular_jacobian_is_a_status() {
        fn g(x: f64) -> f64 {
            x * x + 1.0
        }
        let mut p = Scalar::new(dvector![0.0], g, two_x);
        let out = newton(NlParams::dc()).solve(&mut p).unwrap();
        assert_eq!(out.status, NewtonStatus::LinearSolveFailed);
        assert_eq!(out.failed_linear_solves, 1);
    }

    #[test]
    fn no_root_fails_within_limit() {
        fn g(x: f64) -> f64 {
            x * x + 1.0
        }
        let mut p = Scalar::new(dvector![1.0], g, two_x);
        let params = NlParams::dc().with_max_newton_step(5);
        let out = newton(params).solve(&mut p).unwrap();
        assert!(out.status.is_failed(), "status {:?}", out.status);
        assert!(out.iterations <= 5);
    }

    #[test]
    fn backtracking_rescues_arctan() {
        fn g(x: f64) -> f64 {
            x.atan()
        }
        fn dg(x: f64) -> f64 {
            1.0 / (1.0 + x * x)
        }

        let mut full = Scalar::new(dvector![3.0], g, dg);
        let out = newton(NlParams::dc().with_max_newton_step(20))
            .solve(&mut full)
            .unwrap();
        assert!(!out.converged());

        let mut damped = Scalar::new(dvector![3.0], g, dg);
        let params = NlParams::dc().with_search_method(SearchMethod::Backtrack);
        let out = newton(params).solve(&mut damped).unwrap();
        assert!(out.converged(), "status {:?}", out.status);
        assert!(damped.x[0].abs() < 1e-6);
    }

    #[test]
    fn simple_backtrack_and_bank_rose_converge() {
        fn g(x: f64) -> f64 {
            x.atan()
        }
        fn dg(x: f64) -> f64 {
            1.0 / (1.0 + x * x)
        }
        for method in [SearchMethod::SimpleBacktrack, SearchMethod::BankRose, SearchMethod::Divide] {
            let mut p = Scalar::new(dvector![3.0], g, dg);
            let out = newton(NlParams::dc().with_search_method(method))
                .solve(&mut p)
                .unwrap();
            assert!(out.converged(), "{:?} ended with {:?}", method, out.status);
        }
    }

    #[test]
    fn modified_newton_reuses_jacobian() {
        let mut p = Scalar::new(dvector![3.0], square_minus_four, two_x);
        let params = NlParams::dc().with_strategy(NlStrategy::ModifiedNewton);
        let out = newton(params).solve(&mut p).unwrap();
        assert!(out.converged());
        assert_eq!(out.jacobians, 1);
        assert_eq!(p.jacobian_loads, 1);
        assert!(out.iterations > 1);
    }

    #[test]
    fn spice_limit_caps_each_component() {
        let mut p = Scalar::new(dvector![10.0], square_minus_four, two_x);
        let mut params = NlParams::dc().with_search_method(SearchMethod::SpiceNewton);
        params.max_newton_step = 1;
        params.spice_vlimit = 0.5;
        newton(params).solve(&mut p).unwrap();
        assert!((p.x[0] - 9.5).abs() < 1e-12);
    }

    #[test]
    fn constraints_keep_iterate_in_bounds() {
        let mut p = Scalar::new(dvector![0.5], square_minus_four, two_x);
        let mut params = NlParams::dc().with_constraints(0.0, 3.0, f64::MAX);
        params.max_newton_step = 1;
        newton(params).solve(&mut p).unwrap();
        // the full step would land at 4.25
        assert!((p.x[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn forcing_terms_with_gmres() {
        let mut p = Scalar::new(dvector![3.0, 1.5, 2.5], square_minus_four, two_x);
        let config = LinearSolverConfig::default().with_kind(LinearSolverKind::Gmres);
        let params = NlParams::dc().with_forcing(true);
        let mut solver = DampedNewton::new(params, config);
        let out = solver.solve(&mut p).unwrap();
        assert!(out.converged(), "status {:?}", out.status);
        assert!(solver.eta() >= ETA_MIN && solver.eta() <= ETA_MAX);
        assert!(p.x.iter().all(|v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn max_norm_index_is_reported() {
        let mut p = Scalar::new(dvector![2.0, 5.0], square_minus_four, two_x);
        let mut params = NlParams::dc();
        params.max_newton_step = 1;
        let out = newton(params).solve(&mut p).unwrap();
        assert_eq!(out.max_norm_f_index, 1);
        assert!(out.max_norm_f > 0.0);
    }
}
