//! Numeric state of a time-integration run.
//!
//! [`DataStore`] owns every vector the integrator touches: the rolling
//! `next`/`curr`/`last` solution, state and store vectors, the DAE vectors
//! and matrices, the predictors and Newton corrections, the error weights
//! and the multistep history arrays. Nothing else holds a copy.

use nalgebra::DVector;
use spicier_core::{DaeMatrices, DaeMatrix, DaeVectors, LoadVectors, SystemSizes, VariableKind};

use crate::error::{Error, Result};

/// Copy of the history arrays taken before they are modified.
#[derive(Debug, Clone)]
struct HistorySnapshot {
    x: Vec<DVector<f64>>,
    q: Vec<DVector<f64>>,
    s: Vec<DVector<f64>>,
    sto: Vec<DVector<f64>>,
}

/// Error-weight options.
#[derive(Debug, Clone, Copy)]
pub struct ErrorWeightOptions {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub fast_tests: bool,
    pub volt_zero_tol: f64,
    pub curr_zero_tol: f64,
}

impl ErrorWeightOptions {
    pub fn new(rel_tol: f64, abs_tol: f64) -> Self {
        Self {
            rel_tol,
            abs_tol,
            fast_tests: false,
            volt_zero_tol: 1.0e-6,
            curr_zero_tol: 1.0e-6,
        }
    }
}

/// Owner of all per-simulation numeric vectors.
#[derive(Debug, Clone)]
pub struct DataStore {
    pub sizes: SystemSizes,
    pub max_order: usize,

    pub next_solution: DVector<f64>,
    pub curr_solution: DVector<f64>,
    pub last_solution: DVector<f64>,
    pub next_solution_div_diff: DVector<f64>,
    pub curr_solution_div_diff: DVector<f64>,

    pub next_state: DVector<f64>,
    pub curr_state: DVector<f64>,
    pub last_state: DVector<f64>,
    pub next_state_deriv: DVector<f64>,
    pub curr_state_deriv: DVector<f64>,
    pub next_state_div_diff: DVector<f64>,
    pub curr_state_div_diff: DVector<f64>,

    pub next_store: DVector<f64>,
    pub curr_store: DVector<f64>,
    pub last_store: DVector<f64>,
    pub next_store_lead_curr_q: DVector<f64>,
    pub curr_store_lead_curr_q: DVector<f64>,
    pub last_store_lead_curr_q: DVector<f64>,

    /// Q, F and the limiting corrections from the latest residual load.
    pub dae: DaeVectors,
    /// dQ/dx and dF/dx from the latest Jacobian load.
    pub dae_matrices: DaeMatrices,
    /// Newton residual (right-hand side, already negated).
    pub rhs: DVector<f64>,
    /// Newton Jacobian.
    pub jacobian: DaeMatrix,

    /// Predicted solution.
    pub xn0: DVector<f64>,
    /// Predicted Q.
    pub qn0: DVector<f64>,
    /// Predicted dQ/dt contribution.
    pub qpn0: DVector<f64>,
    pub sn0: DVector<f64>,
    pub spn0: DVector<f64>,
    pub ston0: DVector<f64>,

    /// `next_solution - xn0` after a converged solve.
    pub newton_correction: DVector<f64>,
    pub q_newton_correction: DVector<f64>,
    pub s_newton_correction: DVector<f64>,
    pub sto_newton_correction: DVector<f64>,

    /// Inverse error weights for the solution.
    pub err_wt: DVector<f64>,
    /// Inverse error weights for Q.
    pub q_err_wt: DVector<f64>,

    /// Scratch vectors for order selection.
    pub delta_x: DVector<f64>,
    pub delta_q: DVector<f64>,

    pub x_history: Vec<DVector<f64>>,
    pub q_history: Vec<DVector<f64>>,
    pub s_history: Vec<DVector<f64>>,
    pub sto_history: Vec<DVector<f64>>,

    snapshot: Option<HistorySnapshot>,
    variable_kinds: Vec<VariableKind>,
    device_mask: Option<Vec<bool>>,
}

impl DataStore {
    /// Allocate every vector for the given sizes.
    ///
    /// `topology` comes from circuit construction and `loader` from the
    /// device loader; they must agree.
    pub fn initialize_data_arrays(
        topology: SystemSizes,
        loader: SystemSizes,
        max_order: usize,
    ) -> Result<Self> {
        let checks = [
            ("solution", topology.solution, loader.solution),
            ("state", topology.state, loader.state),
            ("store", topology.store, loader.store),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                log::error!("{what} vector size mismatch: {expected} vs {actual}");
                return Err(Error::SizeMismatch {
                    what,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self::new(topology, max_order))
    }

    /// Allocate without a consistency check.
    pub fn new(sizes: SystemSizes, max_order: usize) -> Self {
        let n = sizes.solution;
        let ns = sizes.state;
        let nsto = sizes.store;
        let max_order = max_order.max(1);
        // OneStep needs three solution history slots even at order 1
        let hist_len = max_order.max(2) + 1;
        let zeros = |len: usize| DVector::zeros(len);
        let history = |len: usize| vec![DVector::zeros(len); hist_len];

        Self {
            sizes,
            max_order,
            next_solution: zeros(n),
            curr_solution: zeros(n),
            last_solution: zeros(n),
            next_solution_div_diff: zeros(n),
            curr_solution_div_diff: zeros(n),
            next_state: zeros(ns),
            curr_state: zeros(ns),
            last_state: zeros(ns),
            next_state_deriv: zeros(ns),
            curr_state_deriv: zeros(ns),
            next_state_div_diff: zeros(ns),
            curr_state_div_diff: zeros(ns),
            next_store: zeros(nsto),
            curr_store: zeros(nsto),
            last_store: zeros(nsto),
            next_store_lead_curr_q: zeros(nsto),
            curr_store_lead_curr_q: zeros(nsto),
            last_store_lead_curr_q: zeros(nsto),
            dae: DaeVectors::new(n),
            dae_matrices: DaeMatrices::new(n),
            rhs: zeros(n),
            jacobian: DaeMatrix::new(n),
            xn0: zeros(n),
            qn0: zeros(n),
            qpn0: zeros(n),
            sn0: zeros(ns),
            spn0: zeros(ns),
            ston0: zeros(nsto),
            newton_correction: zeros(n),
            q_newton_correction: zeros(n),
            s_newton_correction: zeros(ns),
            sto_newton_correction: zeros(nsto),
            err_wt: DVector::from_element(n, 1.0),
            q_err_wt: DVector::from_element(n, 1.0),
            delta_x: zeros(n),
            delta_q: zeros(n),
            x_history: history(n),
            q_history: history(n),
            s_history: history(ns),
            sto_history: history(nsto),
            snapshot: None,
            variable_kinds: vec![VariableKind::Voltage; n],
            device_mask: None,
        }
    }

    pub fn solution_size(&self) -> usize {
        self.sizes.solution
    }

    /// Record variable kinds and the norm mask reported by the loader.
    pub fn set_device_info(&mut self, kinds: Vec<VariableKind>, mask: Option<Vec<bool>>) {
        if kinds.len() == self.sizes.solution {
            self.variable_kinds = kinds;
        }
        self.device_mask = mask.filter(|m| m.len() == self.sizes.solution);
    }

    pub fn variable_kinds(&self) -> &[VariableKind] {
        &self.variable_kinds
    }

    fn is_masked(&self, i: usize) -> bool {
        self.device_mask.as_ref().is_some_and(|m| !m[i])
    }

    /// Split borrows for a loader call: the loader view plus the DAE
    /// outputs it writes.
    pub fn load_view(&mut self) -> (LoadVectors<'_>, &mut DaeVectors, &mut DaeMatrices) {
        let vecs = LoadVectors {
            next_solution: &self.next_solution,
            curr_solution: &self.curr_solution,
            last_solution: &self.last_solution,
            next_state: &mut self.next_state,
            curr_state: &self.curr_state,
            last_state: &self.last_state,
            next_state_deriv: &self.next_state_deriv,
            next_store: &mut self.next_store,
            curr_store: &self.curr_store,
            last_store: &self.last_store,
            next_store_lead_curr_q: &mut self.next_store_lead_curr_q,
        };
        (vecs, &mut self.dae, &mut self.dae_matrices)
    }

    /// Copy `next` into `curr` and `last` for every rolling vector.
    pub fn set_constant_history(&mut self) {
        self.curr_solution.copy_from(&self.next_solution);
        self.last_solution.copy_from(&self.next_solution);
        self.curr_solution_div_diff
            .copy_from(&self.next_solution_div_diff);

        self.curr_state.copy_from(&self.next_state);
        self.last_state.copy_from(&self.next_state);
        self.curr_state_deriv.copy_from(&self.next_state_deriv);
        self.curr_state_div_diff.copy_from(&self.next_state_div_diff);

        self.curr_store.copy_from(&self.next_store);
        self.last_store.copy_from(&self.next_store);
        self.curr_store_lead_curr_q
            .copy_from(&self.next_store_lead_curr_q);
        self.last_store_lead_curr_q
            .copy_from(&self.next_store_lead_curr_q);
    }

    /// Zero every vector and history array.
    pub fn set_zero_history(&mut self) {
        for v in [
            &mut self.next_solution,
            &mut self.next_solution_div_diff,
            &mut self.next_state,
            &mut self.next_state_deriv,
            &mut self.next_state_div_diff,
            &mut self.next_store,
            &mut self.next_store_lead_curr_q,
            &mut self.q_err_wt,
            &mut self.rhs,
            &mut self.xn0,
            &mut self.qn0,
            &mut self.qpn0,
            &mut self.sn0,
            &mut self.spn0,
            &mut self.ston0,
            &mut self.newton_correction,
            &mut self.q_newton_correction,
            &mut self.s_newton_correction,
            &mut self.sto_newton_correction,
            &mut self.delta_x,
            &mut self.delta_q,
        ] {
            v.fill(0.0);
        }
        self.dae.zero();
        self.dae_matrices.zero();
        self.jacobian.clear();

        self.set_constant_history();

        for hist in [
            &mut self.x_history,
            &mut self.q_history,
            &mut self.s_history,
            &mut self.sto_history,
        ] {
            for h in hist.iter_mut() {
                h.fill(0.0);
            }
        }
        self.snapshot = None;
    }

    /// Make `last` equal `curr` and clear derivatives so the first step
    /// can only see one accepted point.
    pub fn enable_order_one_start(&mut self) {
        self.last_solution.copy_from(&self.curr_solution);
        self.curr_solution_div_diff.fill(0.0);

        self.last_state.copy_from(&self.curr_state);
        self.next_state_deriv.fill(0.0);
        self.curr_state_deriv.fill(0.0);
        self.curr_state_div_diff.fill(0.0);

        self.last_store.copy_from(&self.curr_store);
        self.last_store_lead_curr_q
            .copy_from(&self.curr_store_lead_curr_q);
    }

    /// `next - curr` for solution and state.
    pub fn compute_divided_differences(&mut self) {
        self.next_solution_div_diff = &self.next_solution - &self.curr_solution;
        self.next_state_div_diff = &self.next_state - &self.curr_state;
    }

    /// Rotate `next -> curr -> last` and seed the new `next` from `curr`.
    pub fn update_sol_data_arrays(&mut self) {
        fn rotate(next: &mut DVector<f64>, curr: &mut DVector<f64>, last: &mut DVector<f64>) {
            std::mem::swap(last, curr);
            std::mem::swap(curr, next);
        }

        rotate(
            &mut self.next_solution,
            &mut self.curr_solution,
            &mut self.last_solution,
        );
        std::mem::swap(
            &mut self.curr_solution_div_diff,
            &mut self.next_solution_div_diff,
        );
        rotate(
            &mut self.next_state,
            &mut self.curr_state,
            &mut self.last_state,
        );
        std::mem::swap(&mut self.curr_state_deriv, &mut self.next_state_deriv);
        std::mem::swap(
            &mut self.curr_state_div_diff,
            &mut self.next_state_div_diff,
        );
        rotate(
            &mut self.next_store,
            &mut self.curr_store,
            &mut self.last_store,
        );
        rotate(
            &mut self.next_store_lead_curr_q,
            &mut self.curr_store_lead_curr_q,
            &mut self.last_store_lead_curr_q,
        );

        self.next_solution.copy_from(&self.curr_solution);
        self.next_state.copy_from(&self.curr_state);
        self.next_store.copy_from(&self.curr_store);
    }

    /// Build inverse error weights from the current solution and Q.
    ///
    /// Weight is `1 / (rel·|x_i| + abs)`. Masked rows get 0. With fast
    /// tests, variables below their zero tolerance get 0 and current
    /// variables drop the relative term.
    pub fn set_error_wt_vector(&mut self, opts: &ErrorWeightOptions) {
        for i in 0..self.sizes.solution {
            let x = self.curr_solution[i].abs();
            let q = self.dae.q[i].abs();
            let (wx, wq) = if self.is_masked(i) {
                (0.0, 0.0)
            } else if opts.fast_tests {
                match self.variable_kinds[i] {
                    VariableKind::Voltage if x < opts.volt_zero_tol => (0.0, 0.0),
                    VariableKind::Current if x < opts.curr_zero_tol => (0.0, 0.0),
                    VariableKind::Voltage => (
                        1.0 / (opts.rel_tol * x + opts.abs_tol),
                        1.0 / (opts.rel_tol * q + opts.abs_tol),
                    ),
                    VariableKind::Current => {
                        (1.0 / (x + opts.abs_tol), 1.0 / (q + opts.abs_tol))
                    }
                }
            } else {
                (
                    1.0 / (opts.rel_tol * x + opts.abs_tol),
                    1.0 / (opts.rel_tol * q + opts.abs_tol),
                )
            };
            self.err_wt[i] = wx;
            self.q_err_wt[i] = wq;
        }
    }

    fn weighted_rms(v: &DVector<f64>, w: &DVector<f64>) -> f64 {
        let n = v.len();
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = v.iter().zip(w.iter()).map(|(c, w)| (c * w).powi(2)).sum();
        (sum / n as f64).sqrt()
    }

    /// Weighted RMS norm of the Newton correction.
    pub fn wrms_error_norm(&self) -> f64 {
        Self::weighted_rms(&self.newton_correction, &self.err_wt)
    }

    /// Weighted RMS norm of any solution-sized vector.
    pub fn wrms_norm(&self, v: &DVector<f64>) -> f64 {
        Self::weighted_rms(v, &self.err_wt)
    }

    /// Weighted RMS norm using the Q weights.
    pub fn q_wrms_norm(&self, v: &DVector<f64>) -> f64 {
        Self::weighted_rms(v, &self.q_err_wt)
    }

    /// Newton corrections relative to the predictors.
    pub fn step_linear_combo(&mut self) {
        self.newton_correction = &self.next_solution - &self.xn0;
        self.q_newton_correction = &self.dae.q - &self.qn0;
        self.s_newton_correction = &self.next_state - &self.sn0;
        self.sto_newton_correction = &self.next_store - &self.ston0;
    }

    /// Remember the history arrays before modifying them.
    pub fn checkpoint_history(&mut self) {
        self.snapshot = Some(HistorySnapshot {
            x: self.x_history.clone(),
            q: self.q_history.clone(),
            s: self.s_history.clone(),
            sto: self.sto_history.clone(),
        });
    }

    /// Put the history arrays back to the last checkpoint.
    ///
    /// Returns `false` when no checkpoint exists.
    pub fn rollback_history(&mut self) -> bool {
        match self.snapshot.take() {
            Some(snap) => {
                self.x_history = snap.x;
                self.q_history = snap.q;
                self.s_history = snap.s;
                self.sto_history = snap.sto;
                true
            }
            None => false,
        }
    }

    /// Discard the checkpoint once a step is committed.
    pub fn commit_history(&mut self) {
        self.snapshot = None;
    }
}
