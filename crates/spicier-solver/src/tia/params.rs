//! Time-integration parameters.

use super::method::IntegrationMethodKind;

/// Time-integration configuration for one analysis.
///
/// Defaults follow common SPICE practice: BDF up to order 5, relative error
/// 1e-3, absolute error 1e-6, and a 0.1 ns starting step.
#[derive(Debug, Clone)]
pub struct TiaParams {
    /// Formula family used for transient steps.
    pub integration_method: IntegrationMethodKind,
    pub initial_time: f64,
    pub final_time: f64,
    /// First time written to output.
    pub output_start_time: f64,
    /// Fixed output spacing; `None` writes every accepted step.
    pub output_interval: Option<f64>,
    pub starting_time_step: f64,
    pub max_time_step: Option<f64>,
    /// User floor on the step size (0 = none).
    pub user_spec_min_time_step: f64,
    /// Integrate with a fixed step; any failure is fatal.
    pub constant_step_size: bool,
    pub rel_error_tol: f64,
    pub abs_error_tol: f64,
    /// Accept a step when `est_over_tol <= err_tol_acceptance`.
    pub err_tol_acceptance: f64,
    pub max_order: usize,
    pub min_order: usize,
    /// Apply the LTE test on the very first step.
    pub test_first_step: bool,
    /// Step scale applied when restarting at a breakpoint.
    pub restart_time_step_scale: f64,
    /// Times a step at the floor may be force-accepted before giving up.
    pub min_time_step_recovery_counter: usize,
    /// Drop near-zero voltage/current variables from the error norm.
    pub fast_tests: bool,
    pub volt_zero_tol: f64,
    pub curr_zero_tol: f64,
    /// Failed steps remembered for the fatal diagnostic.
    pub history_tracking_depth: usize,
    /// Treat a stalled Newton solve as converged.
    pub pass_nl_stall: bool,
    /// Coefficient on dQ/dx in the operating-point Jacobian.
    pub dcop_regularization: f64,
    /// Honour loader breakpoints.
    pub bp_enable: bool,
    /// Run the operating point twice (PDE devices).
    pub double_dcop: bool,
    /// Skip the operating point and start from the initial guess.
    pub no_dcop: bool,
}

impl Default for TiaParams {
    fn default() -> Self {
        Self {
            integration_method: IntegrationMethodKind::Bdf,
            initial_time: 0.0,
            final_time: 0.0,
            output_start_time: 0.0,
            output_interval: None,
            starting_time_step: 1.0e-10,
            max_time_step: None,
            user_spec_min_time_step: 0.0,
            constant_step_size: false,
            rel_error_tol: 1.0e-3,
            abs_error_tol: 1.0e-6,
            err_tol_acceptance: 1.0,
            max_order: 5,
            min_order: 1,
            test_first_step: false,
            restart_time_step_scale: 0.005,
            min_time_step_recovery_counter: 0,
            fast_tests: false,
            volt_zero_tol: 1.0e-6,
            curr_zero_tol: 1.0e-6,
            history_tracking_depth: 25,
            pass_nl_stall: false,
            dcop_regularization: 1.0e-20,
            bp_enable: true,
            double_dcop: false,
            no_dcop: false,
        }
    }
}

impl TiaParams {
    /// Parameters for a transient run from 0 to `final_time`.
    pub fn transient(final_time: f64) -> Self {
        Self {
            final_time,
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: IntegrationMethodKind) -> Self {
        self.integration_method = method;
        self
    }

    pub fn with_starting_step(mut self, step: f64) -> Self {
        self.starting_time_step = step;
        self
    }

    pub fn with_max_step(mut self, step: f64) -> Self {
        self.max_time_step = Some(step);
        self
    }

    pub fn with_tolerances(mut self, rel: f64, abs: f64) -> Self {
        self.rel_error_tol = rel;
        self.abs_error_tol = abs;
        self
    }

    pub fn with_order_range(mut self, min_order: usize, max_order: usize) -> Self {
        self.min_order = min_order;
        self.max_order = max_order;
        self
    }

    pub fn with_output_interval(mut self, interval: f64) -> Self {
        self.output_interval = Some(interval);
        self
    }

    pub fn with_constant_step(mut self, step: f64) -> Self {
        self.constant_step_size = true;
        self.starting_time_step = step;
        self
    }

    /// Highest order the chosen method supports, clipped by `max_order`.
    pub fn effective_max_order(&self) -> usize {
        self.max_order
            .min(self.integration_method.method_max_order())
            .max(1)
    }

    /// Lowest order, never above the effective maximum.
    pub fn effective_min_order(&self) -> usize {
        self.min_order.max(1).min(self.effective_max_order())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_bounds_follow_method() {
        let params = TiaParams::transient(1e-3).with_order_range(1, 5);
        assert_eq!(params.effective_max_order(), 5);

        let trap = params.clone().with_method(IntegrationMethodKind::Trapezoidal);
        assert_eq!(trap.effective_max_order(), 2);

        let odd = TiaParams::default().with_order_range(4, 2);
        assert_eq!(odd.effective_max_order(), 2);
        assert_eq!(odd.effective_min_order(), 2);
    }

    #[test]
    fn constant_step_sets_start() {
        let params = TiaParams::transient(1.0).with_constant_step(0.01);
        assert!(params.constant_step_size);
        assert_eq!(params.starting_time_step, 0.01);
    }
}
