//! Variable-order, variable-step BDF (orders 1 through 5).
//!
//! History is kept in modified divided-difference form: `history[i]` holds
//! the i-th scaled difference of the solution (and of Q, state and store),
//! so the predictor is a plain sum and a step-size change only rescales
//! the arrays by `beta`.

use nalgebra::DVector;

use super::{Endpoint, IntegrationMethodKind, TimeIntegrationMethod, classify_time};
use crate::tia::data_store::DataStore;
use crate::tia::step_error_control::StepErrorControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderAction {
    Lower,
    Maintain,
    Raise,
}

/// Fixed-leading-coefficient BDF with DASSL-style order selection.
#[derive(Debug, Default)]
pub struct Bdf15;

impl Bdf15 {
    pub fn new() -> Self {
        Self
    }
}

fn predict(hist: &[DVector<f64>], order: usize) -> DVector<f64> {
    hist[1..=order]
        .iter()
        .fold(hist[0].clone(), |acc, h| acc + h)
}

fn predict_derivative(hist: &[DVector<f64>], gamma: &[f64], order: usize) -> DVector<f64> {
    let mut out = DVector::zeros(hist[0].len());
    for i in 1..=order {
        out.axpy(gamma[i], &hist[i], 1.0);
    }
    out
}

fn scale_history(hist: &mut [DVector<f64>], beta: &[f64], from: usize, order: usize) {
    for i in from..=order {
        hist[i] *= beta[i];
    }
}

fn fold_correction(hist: &mut [DVector<f64>], corr: &DVector<f64>, used: usize, max: usize) {
    if used < max {
        hist[used + 1].copy_from(corr);
    }
    hist[used] += corr;
    for j in (0..used).rev() {
        let (lo, hi) = hist.split_at_mut(j + 1);
        lo[j] += &hi[0];
    }
}

impl TimeIntegrationMethod for Bdf15 {
    fn kind(&self) -> IntegrationMethodKind {
        IntegrationMethodKind::Bdf
    }

    fn name(&self) -> &'static str {
        "BDF"
    }

    fn initialize(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        let c = sec.constants;
        let time_to_stop = sec.stop_time - sec.current_time;

        let h = if sec.constant_step_size {
            (0.1 * time_to_stop).min(sec.starting_time_step)
        } else {
            let dnorm_q = ds.q_wrms_norm(&ds.dae.f);
            let mut h = if dnorm_q > 0.0 {
                (c.h0_max_factor * time_to_stop.abs())
                    .min(std::f64::consts::SQRT_2 / (c.h0_safety * dnorm_q))
            } else {
                c.h0_max_factor * time_to_stop.abs()
            };
            if sec.starting_time_step > 0.0 {
                h = h.min(sec.starting_time_step);
            }
            if sec.max_time_step > 0.0 {
                let rh = h.abs() / sec.max_time_step;
                if rh > 1.0 {
                    h /= rh;
                }
            }
            if sec.current_time != sec.initial_time {
                h = h.min(sec.last_time_step);
            }
            h
        };

        sec.current_time_step = h;
        sec.last_time_step = h;
        sec.number_successive_failures = 0;
        sec.step_attempt_status = true;
        sec.next_time = sec.current_time + h;

        for hist in [
            &mut ds.x_history,
            &mut ds.q_history,
            &mut ds.s_history,
            &mut ds.sto_history,
        ] {
            for v in hist.iter_mut() {
                v.fill(0.0);
            }
        }
        ds.x_history[0].copy_from(&ds.curr_solution);
        ds.q_history[0].copy_from(&ds.dae.q);
        ds.q_history[1] = &ds.dae.f * (-h);
        ds.s_history[0].copy_from(&ds.curr_state);
        ds.sto_history[0].copy_from(&ds.curr_store);
        ds.commit_history();

        sec.number_of_steps = 0;
        // only one history point exists; complete_step climbs to min_order
        sec.current_order = 1;
        sec.used_order = sec.current_order;
        sec.new_order = sec.current_order;
        sec.psi[0] = h;
        sec.cj = 1.0 / h;
        sec.nscsco = 0;
        sec.nef = 0;
        sec.initial_phase = true;
        sec.save_psi();

        log::debug!(
            "BDF initialized at t = {:.6e} with h = {:.3e}, order {}",
            sec.current_time,
            h,
            sec.current_order
        );
    }

    fn update_coeffs(&mut self, _ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.save_psi();
        let h = sec.current_time_step;
        let k = sec.current_order;

        if h != sec.used_step || k != sec.used_order {
            sec.nscsco = 0;
        }
        sec.nscsco = (sec.nscsco + 1).min(sec.used_order + 2);

        if k + 1 >= sec.nscsco {
            sec.beta[0] = 1.0;
            sec.alpha[0] = 1.0;
            sec.sigma[0] = 1.0;
            sec.gamma[0] = 0.0;
            let mut temp1 = h;
            for i in 1..=k {
                let temp2 = sec.psi[i - 1];
                sec.psi[i - 1] = temp1;
                sec.beta[i] = sec.beta[i - 1] * sec.psi[i - 1] / temp2;
                temp1 = temp2 + h;
                sec.alpha[i] = h / temp1;
                sec.sigma[i] = (i + 1) as f64 * sec.sigma[i - 1] * sec.alpha[i];
                sec.gamma[i] = sec.gamma[i - 1] + sec.alpha[i - 1] / h;
            }
            sec.psi[k] = temp1;
        }

        sec.alphas = 0.0;
        sec.alpha0 = 0.0;
        for i in 0..k {
            sec.alphas -= 1.0 / (i as f64 + 1.0);
            sec.alpha0 -= sec.alpha[i];
        }
        sec.cj = -sec.alphas / h;
        sec.ck = (sec.alpha[k] + sec.alphas - sec.alpha0)
            .abs()
            .max(sec.alpha[k]);
    }

    fn obtain_predictor(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        ds.checkpoint_history();
        let k = sec.current_order;
        let from = sec.nscsco;
        for hist in [
            &mut ds.x_history,
            &mut ds.q_history,
            &mut ds.s_history,
            &mut ds.sto_history,
        ] {
            scale_history(hist, &sec.beta, from, k);
        }

        ds.xn0 = predict(&ds.x_history, k);
        ds.qn0 = predict(&ds.q_history, k);
        ds.sn0 = predict(&ds.s_history, k);
        ds.ston0 = predict(&ds.sto_history, k);
        ds.qpn0 = predict_derivative(&ds.q_history, &sec.gamma, k);
        ds.spn0 = predict_derivative(&ds.s_history, &sec.gamma, k);

        ds.next_solution.copy_from(&ds.xn0);
    }

    fn obtain_residual(&self, ds: &mut DataStore, sec: &StepErrorControl, limiting: bool) {
        let cj = sec.cj;
        let mut rhs = &ds.dae.q - &ds.qn0;
        rhs *= cj;
        rhs += &ds.qpn0;
        rhs += &ds.dae.f;
        rhs.neg_mut();
        if limiting {
            rhs.axpy(cj, &ds.dae.dqdx_dvp, 1.0);
            rhs += &ds.dae.dfdx_dvp;
        }
        ds.rhs = rhs;
    }

    fn obtain_jacobian(&self, ds: &mut DataStore, sec: &StepErrorControl) {
        ds.jacobian
            .linear_combo(sec.cj, &ds.dae_matrices.dqdx, 1.0, &ds.dae_matrices.dfdx);
    }

    fn update_state_deriv(&self, ds: &mut DataStore, sec: &StepErrorControl) {
        let mut deriv = &ds.next_state - &ds.sn0;
        deriv *= sec.cj;
        deriv += &ds.spn0;
        ds.next_state_deriv = deriv;
    }

    fn compute_error_estimate(&mut self, ds: &mut DataStore, sec: &StepErrorControl) -> f64 {
        sec.ck * ds.wrms_error_norm()
    }

    fn update_history(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        ds.checkpoint_history();
        sec.save_psi();
        let used = sec.used_order;
        let max = sec.max_order;
        let DataStore {
            x_history,
            q_history,
            s_history,
            sto_history,
            newton_correction,
            q_newton_correction,
            s_newton_correction,
            sto_newton_correction,
            ..
        } = ds;
        fold_correction(x_history, newton_correction, used, max);
        fold_correction(q_history, q_newton_correction, used, max);
        fold_correction(s_history, s_newton_correction, used, max);
        fold_correction(sto_history, sto_newton_correction, used, max);
    }

    fn restore_history(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        if !ds.rollback_history() {
            log::debug!("no history checkpoint to restore");
        }
        sec.restore_psi();
    }

    fn check_reduce_order(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        let k = sec.current_order;
        sec.ek = sec.sigma[k] * sec.est_over_tol;
        sec.tk = (k + 1) as f64 * sec.ek;
        sec.est = sec.ek;
        sec.new_order = k;

        if k > 1 {
            ds.delta_x = &ds.x_history[k] + &ds.newton_correction;
            let dnorm = sec.ck * ds.wrms_norm(&ds.delta_x);
            sec.ekm1 = sec.sigma[k - 1] * dnorm;
            sec.tkm1 = k as f64 * sec.ekm1;

            if k > 2 {
                ds.delta_x += &ds.x_history[k - 1];
                let dnorm = sec.ck * ds.wrms_norm(&ds.delta_x);
                sec.ekm2 = sec.sigma[k - 2] * dnorm;
                sec.tkm2 = (k - 1) as f64 * sec.ekm2;
                if sec.tkm1.max(sec.tkm2) <= sec.tk {
                    sec.new_order -= 1;
                    sec.est = sec.ekm1;
                }
            } else if sec.tkm1 <= sec.constants.tkm1_tk_safety * sec.tk {
                sec.new_order -= 1;
                sec.est = sec.ekm1;
            }
        }
    }

    fn reject_step(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl) {
        self.check_reduce_order(ds, sec);
        let c = sec.constants;
        let adjust = !sec.constant_step_size;
        let mut new_h = sec.current_time_step;

        if !sec.step_attempt_status {
            sec.nef += 1;
            self.restore_history(ds, sec);

            if adjust {
                sec.initial_phase = false;
                let lowered = sec
                    .current_order
                    .saturating_sub(1)
                    .max(sec.min_order)
                    .min(sec.current_order);
                let rr = if sec.newton_convergence_status <= 0 {
                    if sec.nef > 2 {
                        sec.new_order = lowered;
                    }
                    c.r_min
                } else if sec.nef == 1 {
                    sec.clamp_reduction(c.r_factor * sec.step_adjust(sec.est, sec.new_order))
                } else if sec.nef == 2 {
                    c.r_min
                } else {
                    sec.new_order = lowered;
                    c.r_min
                };
                new_h = rr * sec.current_time_step;

                if sec.new_order >= sec.min_order {
                    sec.current_order = sec.new_order;
                }
                if sec.number_of_steps == 0 {
                    sec.psi[0] = new_h;
                    ds.x_history[1] *= rr;
                    ds.q_history[1] *= rr;
                }
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
        let adjust = !sec.constant_step_size;
        let h = sec.current_time_step;
        let k = sec.current_order;
        let mut new_h = h;

        sec.last_time_step = h;
        let raised_last_step = k == sec.used_order + 1;
        sec.used_order = k;
        sec.used_step = h;

        if sec.new_order + 1 == k || k == sec.max_order {
            sec.initial_phase = false;
        }

        if sec.initial_phase {
            sec.current_order += 1;
            new_h = c.h_phase0_incr * h;
        } else {
            let mut action = if sec.new_order + 1 == k {
                OrderAction::Lower
            } else if sec.new_order == sec.max_order || k + 1 >= sec.nscsco || raised_last_step {
                OrderAction::Maintain
            } else {
                ds.delta_x = &ds.newton_correction - &ds.x_history[k + 1];
                sec.tkp1 = sec.ck * ds.wrms_norm(&ds.delta_x);
                sec.ekp1 = sec.tkp1 / (k + 2) as f64;
                if k == 1 {
                    if sec.tkp1 >= c.tkp1_tk_safety * sec.tk {
                        OrderAction::Maintain
                    } else {
                        OrderAction::Raise
                    }
                } else if sec.tkm1 <= sec.tk.min(sec.tkp1) {
                    OrderAction::Lower
                } else if sec.tkp1 >= sec.tk {
                    OrderAction::Maintain
                } else {
                    OrderAction::Raise
                }
            };

            let below_min = k < sec.min_order;
            if below_min {
                action = OrderAction::Raise;
            } else if k == sec.min_order && action == OrderAction::Lower {
                action = OrderAction::Maintain;
            }

            match action {
                OrderAction::Raise => {
                    sec.current_order += 1;
                    if !below_min {
                        sec.est = sec.ekp1;
                    }
                }
                OrderAction::Lower => {
                    sec.current_order -= 1;
                    sec.est = sec.ekm1;
                }
                OrderAction::Maintain => {}
            }

            let rr = sec.step_adjust(sec.est, sec.current_order);
            if rr >= c.r_hincr_test {
                new_h = c.r_hincr * h;
            } else if rr <= 1.0 {
                new_h = sec.clamp_reduction(rr) * h;
            }
        }

        self.update_history(ds, sec);

        if sec.current_time < sec.stop_time {
            sec.set_time_step(if adjust { new_h } else { h });
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
                let order = sec.used_order.max(1);
                let delt = t - sec.current_time;
                let mut out = ds.x_history[0].clone();
                let mut c = 1.0;
                let mut gam = delt / sec.psi[0];
                for j in 1..=order {
                    c *= gam;
                    gam = (delt + sec.psi[j - 1]) / sec.psi[j];
                    out.axpy(c, &ds.x_history[j], 1.0);
                }
                Some(out)
            }
        }
    }

    fn leading_coeff(&self, sec: &StepErrorControl) -> f64 {
        sec.cj
    }
}
