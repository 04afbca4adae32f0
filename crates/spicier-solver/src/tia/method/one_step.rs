//! Backward Euler / trapezoidal one-step integration.
//!
//! Order 1 is Backward Euler and order 2 the trapezoidal rule. The charge
//! derivative `dQ/dt` at the last accepted point is carried in
//! `q_history[1]` so the trapezoidal residual needs no extra loads. The
//! local error is estimated Milne-style from the distance between the
//! corrector and a polynomial predictor through the last accepted points.

use nalgebra::DVector;

use super::{Endpoint, IntegrationMethodKind, TimeIntegrationMethod, classify_time};
use crate::tia::data_store::DataStore;
use crate::tia::step_error_control::StepErrorControl;

/// Backward Euler start, trapezoidal thereafter.
#[derive(Debug)]
pub struct OneStep {
    /// Accepted points available to the predictor (1 to 3).
    points: usize,
}

impl Default for OneStep {
    fn default() -> Self {
        Self::new()
    }
}

impl OneStep {
    pub fn new() -> Self {
        Self { points: 1 }
    }

    /// `(c, theta)` in `c·(Q - q_n) - theta·qdot_n`.
    fn coefficients(order: usize, h: f64) -> (f64, f64) {
        if order >= 2 { (2.0 / h, 1.0) } else { (1.0 / h, 0.0) }
    }

    /// Extrapolate the solution history to `t_n + h`.
    fn extrapolate(&self, ds: &DataStore, sec: &StepErrorControl) -> DVector<f64> {
        let h = sec.current_time_step;
        let (p0, p1) = (sec.psi[0], sec.psi[1]);
        let x = &ds.x_history;
        let degree = self.predictor_degree(sec.current_order);
        match degree {
            0 => x[0].clone(),
            1 => {
                let mut out = x[0].clone();
                out.axpy(h / p0, &(&x[0] - &x[1]), 1.0);
                out
            }
            _ => {
                let l0 = (h + p0) * (h + p0 + p1) / (p0 * (p0 + p1));
                let l1 = -h * (h + p0 + p1) / (p0 * p1);
                let l2 = h * (h + p0) / ((p0 + p1) * p1);
                let mut out = &x[0] * l0;
                out.axpy(l1, &x[1], 1.0);
                out.axpy(l2, &x[2], 1.0);
                out
            }
        }
    }

    fn predictor_degree(&self, order: usize) -> usize {
        order.min(self.points.saturating_sub(1))
    }
}

impl TimeIntegrationMethod for OneStep {
    fn kind(&self) -> IntegrationMethodKind {
        IntegrationMethodKind::Trapezoidal
    }

    fn name(&self) -> &'static str {
        "Trapezoidal"
    }

    fn initialize(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.initialize_step_size_variables();
        let h = sec.current_time_step;

        for i in 0..3 {
            ds.x_history[i].copy_from(&ds.curr_solution);
        }
        ds.q_history[0].copy_from(&ds.dae.q);
        // consistent point of dQ/dt + F = 0
        ds.q_history[1] = -ds.dae.f.clone();
        ds.s_history[0].copy_from(&ds.curr_state);
        ds.s_history[1].copy_from(&ds.curr_state_deriv);
        ds.sto_history[0].copy_from(&ds.curr_store);
        ds.commit_history();

        self.points = 1;
        sec.number_of_steps = 0;
        sec.nef = 0;
        sec.nscsco = 0;
        sec.initial_phase = true;
        sec.current_order = sec.min_order.clamp(1, 2);
        sec.used_order = sec.current_order;
        sec.new_order = sec.current_order;
        sec.psi[0] = h;
        sec.psi[1] = h;
        sec.save_psi();

        log::debug!(
            "trapezoidal initialized at t = {:.6e} with h = {:.3e}",
            sec.current_time,
            h
        );
    }

    fn update_coeffs(&mut self, _ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.save_psi();
        let h = sec.current_time_step;
        let (c, _) = Self::coefficients(sec.current_order, h);
        sec.cj = c;
        sec.alphas = -c * h;

        let (p0, p1) = (sec.psi[0], sec.psi[1]);
        sec.ck = match self.predictor_degree(sec.current_order) {
            2 => h * h / (h * h + 2.0 * (h + p0) * (h + p0 + p1)),
            // first-order estimate; conservative for a constant or linear
            // predictor
            _ => h / (2.0 * h + p0),
        };
    }

    fn obtain_predictor(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        ds.checkpoint_history();
        ds.xn0 = self.extrapolate(ds, sec);
        ds.qn0.copy_from(&ds.q_history[0]);
        ds.qpn0.copy_from(&ds.q_history[1]);
        ds.sn0.copy_from(&ds.s_history[0]);
        ds.spn0.copy_from(&ds.s_history[1]);
        ds.ston0.copy_from(&ds.sto_history[0]);
        ds.next_solution.copy_from(&ds.xn0);
    }

    fn obtain_residual(&self, ds: &mut DataStore, sec: &StepErrorControl, limiting: bool) {
        let (c, theta) = Self::coefficients(sec.current_order, sec.current_time_step);
        let mut rhs = &ds.dae.q - &ds.qn0;
        rhs *= c;
        rhs.axpy(-theta, &ds.qpn0, 1.0);
        rhs += &ds.dae.f;
        rhs.neg_mut();
        if limiting {
            rhs.axpy(c, &ds.dae.dqdx_dvp, 1.0);
            rhs += &ds.dae.dfdx_dvp;
        }
        ds.rhs = rhs;
    }

    fn obtain_jacobian(&self, ds: &mut DataStore, sec: &StepErrorControl) {
        ds.jacobian
            .linear_combo(sec.cj, &ds.dae_matrices.dqdx, 1.0, &ds.dae_matrices.dfdx);
    }

    fn update_state_deriv(&self, ds: &mut DataStore, sec: &StepErrorControl) {
        let (c, theta) = Self::coefficients(sec.current_order, sec.current_time_step);
        let mut deriv = &ds.next_state - &ds.sn0;
        deriv *= c;
        deriv.axpy(-theta, &ds.spn0, 1.0);
        ds.next_state_deriv = deriv;
    }

    fn compute_error_estimate(&mut self, ds: &mut DataStore, sec: &StepErrorControl) -> f64 {
        // after a restart the predictor is the restart point, so this is the
        // divided difference against it
        sec.ck * ds.wrms_error_norm()
    }

    fn update_history(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        ds.checkpoint_history();
        sec.save_psi();
        let (c, theta) = Self::coefficients(sec.used_order, sec.used_step);

        let mut qdot = &ds.dae.q - &ds.q_history[0];
        qdot *= c;
        qdot.axpy(-theta, &ds.q_history[1], 1.0);

        ds.x_history.swap(1, 2);
        ds.x_history.swap(0, 1);
        ds.x_history[0].copy_from(&ds.next_solution);
        ds.q_history[0].copy_from(&ds.dae.q);
        ds.q_history[1] = qdot;
        ds.s_history[0].copy_from(&ds.next_state);
        ds.s_history[1].copy_from(&ds.next_state_deriv);
        ds.sto_history[0].copy_from(&ds.next_store);

        sec.psi[1] = sec.psi[0];
        sec.psi[0] = sec.used_step;
    }

    fn restore_history(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        if !ds.rollback_history() {
            log::debug!("no history checkpoint to restore");
        }
        sec.restore_psi();
    }

    fn check_reduce_order(&mut self, _ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.new_order = sec.current_order;
        sec.est = sec.est_over_tol;
    }

    fn reject_step(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        self.check_reduce_order(ds, sec);
        let c = sec.constants;
        let mut new_h = sec.current_time_step;

        if !sec.step_attempt_status {
            sec.nef += 1;
            self.restore_history(ds, sec);

            if !sec.constant_step_size {
                sec.initial_phase = false;
                let rr = if sec.newton_convergence_status <= 0 || sec.nef >= 2 {
                    c.r_min
                } else {
                    sec.clamp_reduction(c.r_factor * sec.step_adjust(sec.est, sec.current_order))
                };
                if sec.nef > 2 && sec.current_order > sec.min_order {
                    sec.current_order -= 1;
                    sec.new_order = sec.current_order;
                }
                new_h = rr * sec.current_time_step;
                log::debug!(
                    "step rejected (failure {}): h {:.3e} -> {:.3e}, order {}",
                    sec.nef,
                    sec.current_time_step,
                    new_h,
                    sec.current_order
                );
            }
        }

        sec.set_time_step(new_h);
    }

    fn complete_step(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.number_of_steps += 1;
        sec.nef = 0;
        sec.last_time = sec.current_time;
        sec.current_time = sec.next_time;
        self.check_reduce_order(ds, sec);

        let c = sec.constants;
        let h = sec.current_time_step;
        sec.last_time_step = h;
        sec.used_order = sec.current_order;
        sec.used_step = h;

        self.update_history(ds, sec);
        self.points = (self.points + 1).min(3);

        let mut new_h = h;
        if !sec.constant_step_size {
            let rr = sec.step_adjust(sec.est, sec.used_order);
            if rr >= c.r_hincr_test {
                new_h = c.r_hincr * h;
            } else if rr <= 1.0 {
                new_h = sec.clamp_reduction(rr) * h;
            }
        }
        if sec.current_order < sec.max_order {
            sec.current_order += 1;
            sec.initial_phase = false;
        }

        if sec.current_time < sec.stop_time {
            sec.set_time_step(new_h);
        }
        log::debug!(
            "step accepted at t = {:.6e}: next h {:.3e}, order {}",
            sec.current_time,
            sec.current_time_step,
            sec.current_order
        );
    }

    fn interpolate_solution(
        &self,
        ds: &DataStore,
        sec: &StepErrorControl,
        t: f64,
    ) -> Option<DVector<f64>> {
        match classify_time(ds, sec, t) {
            Endpoint::Exact(v) => Some(v),
            Endpoint::Outside => None,
            Endpoint::Interior => {
                let w = (t - sec.last_time) / (sec.current_time - sec.last_time);
                let mut out = &ds.last_solution * (1.0 - w);
                out.axpy(w, &ds.curr_solution, 1.0);
                Some(out)
            }
        }
    }

    fn leading_coeff(&self, sec: &StepErrorControl) -> f64 {
        sec.cj
    }
}
