//! Step-size, order and breakpoint bookkeeping.
//!
//! [`StepErrorControl`] holds every scalar the integrator needs between
//! steps: times, step sizes, the current and used order, the variable-order
//! coefficient arrays and the local error estimates. Integration methods
//! read and write it; the transient loop drives it.

use super::params::TiaParams;

/// Weights and limits of the step/order selection heuristic.
#[derive(Debug, Clone, Copy)]
pub struct StepControlConstants {
    pub r_factor: f64,
    pub r_safety: f64,
    pub r_fudge: f64,
    pub r_min: f64,
    pub r_max: f64,
    pub r_hincr_test: f64,
    pub r_hincr: f64,
    pub h_phase0_incr: f64,
    pub h0_safety: f64,
    pub h0_max_factor: f64,
    pub tkm1_tk_safety: f64,
    pub tkp1_tk_safety: f64,
    pub min_step_precision_fac: f64,
    pub newton_step_reduction: f64,
}

impl Default for StepControlConstants {
    fn default() -> Self {
        Self {
            r_factor: 1.0,
            r_safety: 2.0,
            r_fudge: 1.0e-4,
            r_min: 0.25,
            r_max: 0.9,
            r_hincr_test: 2.0,
            r_hincr: 2.0,
            h_phase0_incr: 2.0,
            h0_safety: 2.0,
            h0_max_factor: 0.005,
            tkm1_tk_safety: 2.0,
            tkp1_tk_safety: 0.5,
            min_step_precision_fac: 10.0,
            newton_step_reduction: 0.25,
        }
    }
}

/// Scalar integrator state shared by the methods and the transient loop.
#[derive(Debug, Clone)]
pub struct StepErrorControl {
    pub constants: StepControlConstants,

    pub initial_time: f64,
    pub final_time: f64,
    pub current_time: f64,
    pub next_time: f64,
    pub last_time: f64,
    pub stop_time: f64,
    pub old_stop_time: f64,

    pub current_time_step: f64,
    pub last_time_step: f64,
    pub used_step: f64,
    pub min_time_step: f64,
    pub max_time_step: f64,
    pub max_time_step_user: Option<f64>,
    pub starting_time_step: f64,
    pub saved_time_step: f64,
    pub user_spec_min_time_step: f64,
    pub constant_step_size: bool,

    pub current_order: usize,
    pub used_order: usize,
    pub min_order: usize,
    pub max_order: usize,
    pub new_order: usize,

    pub number_of_steps: usize,
    /// Steps taken with the current step size and order.
    pub nscsco: usize,
    /// Consecutive error-test failures at this time point.
    pub nef: usize,
    /// Still ramping order and step after a (re)start.
    pub initial_phase: bool,

    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub psi: Vec<f64>,
    pub sigma: Vec<f64>,
    pub gamma: Vec<f64>,
    pub alphas: f64,
    pub alpha0: f64,
    /// Leading coefficient of the discretized dQ/dt.
    pub cj: f64,
    /// Error constant of the current formula.
    pub ck: f64,

    pub ek: f64,
    pub ekm1: f64,
    pub ekm2: f64,
    pub ekp1: f64,
    pub tk: f64,
    pub tkm1: f64,
    pub tkm2: f64,
    pub tkp1: f64,
    pub est: f64,
    pub est_over_tol: f64,

    pub step_attempt_status: bool,
    pub newton_convergence_status: i32,
    pub n_iterations: usize,
    pub number_successive_failures: usize,

    test_first_step: bool,
    err_tol_acceptance: f64,
    restart_time_step_scale: f64,
    bp_enable: bool,
    breakpoints: Vec<f64>,
    bp_tol: f64,
    saved_psi: Vec<f64>,
}

impl StepErrorControl {
    pub fn new(params: &TiaParams) -> Self {
        let max_order = params.effective_max_order();
        let len = max_order + 2;
        let mut sec = Self {
            constants: StepControlConstants {
                h0_max_factor: params.restart_time_step_scale,
                ..Default::default()
            },
            initial_time: 0.0,
            final_time: 0.0,
            current_time: 0.0,
            next_time: 0.0,
            last_time: 0.0,
            stop_time: 0.0,
            old_stop_time: 0.0,
            current_time_step: 0.0,
            last_time_step: 0.0,
            used_step: 0.0,
            min_time_step: 0.0,
            max_time_step: 0.0,
            max_time_step_user: None,
            starting_time_step: 0.0,
            saved_time_step: 0.0,
            user_spec_min_time_step: 0.0,
            constant_step_size: false,
            current_order: 1,
            used_order: 1,
            min_order: 1,
            max_order,
            new_order: 1,
            number_of_steps: 0,
            nscsco: 0,
            nef: 0,
            initial_phase: true,
            alpha: vec![0.0; len],
            beta: vec![0.0; len],
            psi: vec![0.0; len],
            sigma: vec![0.0; len],
            gamma: vec![0.0; len],
            alphas: 0.0,
            alpha0: 0.0,
            cj: 0.0,
            ck: 0.0,
            ek: 0.0,
            ekm1: 0.0,
            ekm2: 0.0,
            ekp1: 0.0,
            tk: 0.0,
            tkm1: 0.0,
            tkm2: 0.0,
            tkp1: 0.0,
            est: 0.0,
            est_over_tol: 0.0,
            step_attempt_status: true,
            newton_convergence_status: -1,
            n_iterations: 0,
            number_successive_failures: 0,
            test_first_step: false,
            err_tol_acceptance: 1.0,
            restart_time_step_scale: params.restart_time_step_scale,
            bp_enable: true,
            breakpoints: Vec::new(),
            bp_tol: 0.0,
            saved_psi: vec![0.0; len],
        };
        sec.reset_all(params);
        sec
    }

    /// Return to the state before the first step of a run.
    ///
    /// Called at construction and again for every `.STEP` point.
    pub fn reset_all(&mut self, params: &TiaParams) {
        let starting = if params.starting_time_step > 0.0 {
            params.starting_time_step
        } else {
            1.0e-10
        };
        self.starting_time_step = starting;
        self.current_time_step = starting;
        self.last_time_step = starting;
        self.used_step = 0.0;
        self.saved_time_step = 0.0;

        self.initial_time = params.initial_time;
        self.final_time = params.final_time;
        self.current_time = params.initial_time;
        self.last_time = params.initial_time;
        self.next_time = params.initial_time;
        self.stop_time = params.final_time;
        self.old_stop_time = params.final_time;

        self.max_time_step_user = params.max_time_step.filter(|h| *h > 0.0);
        self.max_time_step = self.default_max_time_step();
        self.min_time_step = 0.0;
        self.user_spec_min_time_step = params.user_spec_min_time_step.max(0.0);
        self.constant_step_size = params.constant_step_size;
        self.test_first_step = params.test_first_step;
        self.err_tol_acceptance = params.err_tol_acceptance;
        self.restart_time_step_scale = params.restart_time_step_scale;
        self.bp_enable = params.bp_enable;

        self.max_order = params.effective_max_order();
        self.min_order = params.effective_min_order();
        self.current_order = self.min_order;
        self.used_order = self.min_order;
        self.new_order = self.min_order;
        let len = self.max_order + 2;
        for arr in [
            &mut self.alpha,
            &mut self.beta,
            &mut self.psi,
            &mut self.sigma,
            &mut self.gamma,
            &mut self.saved_psi,
        ] {
            arr.clear();
            arr.resize(len, 0.0);
        }

        self.number_of_steps = 0;
        self.nscsco = 0;
        self.nef = 0;
        self.initial_phase = true;
        self.alphas = 0.0;
        self.alpha0 = 0.0;
        self.cj = 0.0;
        self.ck = 0.0;
        self.est = 0.0;
        self.est_over_tol = 0.0;
        self.number_successive_failures = 0;
        self.step_attempt_status = true;
        self.newton_convergence_status = -1;
        self.n_iterations = 0;

        self.breakpoints.clear();
        self.bp_tol = 0.0;
        self.set_breakpoint(self.final_time);
    }

    fn default_max_time_step(&self) -> f64 {
        self.max_time_step_user
            .unwrap_or(0.1 * (self.final_time - self.initial_time))
    }

    /// Clamp `h` to `[min, max]`, clip it to the stop time and set the
    /// next time.
    pub fn set_time_step(&mut self, h: f64) {
        let mut h = h;
        if self.max_time_step > 0.0 {
            h = h.min(self.max_time_step);
        }
        h = h.max(self.min_time_step);
        if self.current_time + h > self.stop_time {
            self.current_time_step = self.stop_time - self.current_time;
            self.next_time = self.stop_time;
            return;
        }
        self.current_time_step = h;
        self.next_time = self.current_time + h;
    }

    /// Pick a step for a (re)start of the history.
    pub fn initialize_step_size_variables(&mut self) {
        let time_to_stop = self.stop_time - self.current_time;
        let mut h = if self.constant_step_size {
            0.1 * time_to_stop
        } else {
            self.restart_time_step_scale * time_to_stop
        };
        if self.current_time == self.initial_time || self.constant_step_size {
            h = h.min(self.starting_time_step);
        } else {
            h = h.min(self.last_time_step);
        }
        self.current_time_step = h;
        self.last_time_step = h;
        self.number_successive_failures = 0;
        self.step_attempt_status = true;
        self.next_time = self.current_time + h;
    }

    /// Register a time the integrator must land on.
    pub fn set_breakpoint(&mut self, t: f64) {
        let pos = self.breakpoints.partition_point(|&b| b < t);
        if self.breakpoints.get(pos) != Some(&t) {
            self.breakpoints.insert(pos, t);
        }
    }

    pub fn add_breakpoints(&mut self, times: impl IntoIterator<Item = f64>) {
        for t in times {
            if t > self.last_time && t <= self.final_time {
                self.set_breakpoint(t);
            }
        }
    }

    pub fn breakpoints(&self) -> &[f64] {
        &self.breakpoints
    }

    pub fn breakpoint_tolerance(&self) -> f64 {
        self.bp_tol
    }

    /// Drop breakpoints already passed and merge the ones closer than the
    /// breakpoint tolerance, keeping the earlier of each pair.
    pub fn update_breakpoints(&mut self, loader_breakpoints: impl IntoIterator<Item = f64>) {
        if self.bp_enable {
            self.add_breakpoints(loader_breakpoints);
        }
        let last = self.last_time;
        self.breakpoints.retain(|&b| b >= last);
        self.bp_tol = 2.0 * self.min_time_step;

        let tol = self.bp_tol;
        let mut merged: Vec<f64> = Vec::with_capacity(self.breakpoints.len());
        for &b in &self.breakpoints {
            match merged.last() {
                Some(&prev) if (b - prev).abs() <= tol => {}
                _ => merged.push(b),
            }
        }
        // the final time always survives a merge
        if let Some(last_bp) = merged.last_mut()
            && (self.final_time - *last_bp).abs() <= tol
        {
            *last_bp = self.final_time;
        }
        self.breakpoints = merged;
    }

    /// Stop time for the next step: the earlier of the final time and the
    /// next breakpoint ahead of the current time.
    pub fn update_stop_time(&mut self, begin_integration: bool) {
        self.old_stop_time = self.stop_time;
        if !self.bp_enable {
            self.stop_time = self.final_time;
            return;
        }
        let t = self.current_time;
        let tol = self.bp_tol;
        let mut ahead = self
            .breakpoints
            .iter()
            .copied()
            .filter(|&b| b > t + tol || (b > t && b == self.final_time));
        let mut stop = ahead.next().unwrap_or(self.final_time).min(self.final_time);

        if begin_integration
            && (stop - self.old_stop_time).abs() < tol
            && stop != self.final_time
        {
            stop = ahead.next().unwrap_or(self.final_time).min(self.final_time);
        }
        self.stop_time = stop;
        log::trace!("stop time {:.6e} at t = {:.6e}", stop, t);
    }

    /// Smallest representable step, relative to the larger of the current
    /// time and the length of the run.
    pub fn update_min_time_step(&mut self) {
        let scale = self
            .current_time
            .abs()
            .max((self.final_time - self.initial_time).abs());
        self.min_time_step = scale * self.constants.min_step_precision_fac * f64::EPSILON;
    }

    /// Largest allowed step: the user limit (or a tenth of the run), further
    /// limited by a positive loader suggestion.
    pub fn update_max_time_step(&mut self, suggested: Option<f64>) {
        let mut max = self.default_max_time_step();
        if let Some(s) = suggested.filter(|s| *s > 0.0) {
            max = max.min(s);
        }
        self.max_time_step = max;
    }

    /// Whether the step has fallen under the user-specified floor.
    pub fn step_below_user_floor(&self) -> bool {
        self.user_spec_min_time_step > 0.0 && self.current_time_step < self.user_spec_min_time_step
    }

    /// Accept/reject a finished step attempt.
    ///
    /// `estimate` is only called when the local error test applies: never
    /// after a Newton failure, and never on the first step of a run (or
    /// after a breakpoint restart at the initial time) unless the first
    /// step is to be tested.
    pub fn evaluate_step_error(
        &mut self,
        step_number: usize,
        begin_integration: bool,
        estimate: impl FnOnce(&Self) -> f64,
    ) -> bool {
        let newton_ok = self.newton_convergence_status > 0;
        let mut test_error = if self.current_time == self.initial_time {
            step_number >= 1 && !begin_integration
        } else {
            step_number >= 1
        };
        if self.test_first_step {
            test_error = true;
        }
        if !newton_ok {
            test_error = false;
        }

        let mut status = newton_ok;
        if test_error {
            self.est_over_tol = estimate(self);
            let error_ok = self.est_over_tol <= self.err_tol_acceptance;
            if self.step_below_user_floor() {
                log::debug!(
                    "step {:.3e} below user floor, accepting on Newton status alone",
                    self.current_time_step
                );
            } else if !self.constant_step_size {
                status &= error_ok;
            }
        }
        self.step_attempt_status = status;
        log::debug!(
            "t = {:.6e} h = {:.3e} order {} newton {} est/tol {:.3e} -> {}",
            self.next_time,
            self.current_time_step,
            self.current_order,
            self.newton_convergence_status,
            self.est_over_tol,
            if status { "accept" } else { "reject" }
        );
        status
    }

    /// Step ratio suggested by an error estimate at `order`.
    pub fn step_adjust(&self, est: f64, order: usize) -> f64 {
        let c = &self.constants;
        (c.r_safety * (est + c.r_fudge)).powf(-1.0 / (order as f64 + 1.0))
    }

    /// Restrict a reduction ratio to `[r_min, r_max]`.
    pub fn clamp_reduction(&self, r: f64) -> f64 {
        r.clamp(self.constants.r_min, self.constants.r_max)
    }

    pub fn save_psi(&mut self) {
        self.saved_psi.copy_from_slice(&self.psi);
    }

    pub fn restore_psi(&mut self) {
        self.psi.copy_from_slice(&self.saved_psi);
    }

    /// True when the current time sits on the stop time but not the end of
    /// the run; the history must restart there.
    pub fn at_breakpoint(&self) -> bool {
        (self.current_time - self.stop_time).abs() <= self.bp_tol
            && (self.current_time - self.final_time).abs() > self.bp_tol
    }

    /// Run has reached the final time.
    pub fn finished(&self) -> bool {
        self.current_time >= self.final_time
            || (self.final_time - self.current_time).abs() <= self.bp_tol.max(self.min_time_step)
    }
}
