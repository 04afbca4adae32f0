//! Operating-point "integration": the time derivative is dropped.

use nalgebra::DVector;

use super::{IntegrationMethodKind, TimeIntegrationMethod};
use crate::tia::data_store::DataStore;
use crate::tia::step_error_control::StepErrorControl;

/// Solves `F(x) = 0`.
///
/// dQ/dx still enters the Jacobian scaled by a tiny regularization so that
/// nodes connected only through capacitors do not make it singular.
#[derive(Debug, Clone)]
pub struct NoTimeIntegration {
    regularization: f64,
}

impl NoTimeIntegration {
    pub fn new(regularization: f64) -> Self {
        Self { regularization }
    }
}

impl Default for NoTimeIntegration {
    fn default() -> Self {
        Self::new(1.0e-20)
    }
}

impl TimeIntegrationMethod for NoTimeIntegration {
    fn kind(&self) -> IntegrationMethodKind {
        IntegrationMethodKind::None
    }

    fn name(&self) -> &'static str {
        "operating point"
    }

    fn initialize(&mut self, _ds: &mut DataStore, _sec: &mut StepErrorControl) {}

    fn update_coeffs(&mut self, _ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.cj = self.regularization;
        sec.ck = 0.0;
    }

    fn obtain_predictor(&mut self, ds: &mut DataStore, _sec: &mut StepErrorControl) {
        ds.xn0.copy_from(&ds.next_solution);
        ds.qn0.fill(0.0);
        ds.sn0.copy_from(&ds.next_state);
        ds.ston0.copy_from(&ds.next_store);
    }

    fn obtain_residual(&self, ds: &mut DataStore, _sec: &StepErrorControl, limiting: bool) {
        let mut rhs = -ds.dae.f.clone();
        if limiting {
            rhs += &ds.dae.dfdx_dvp;
        }
        ds.rhs = rhs;
    }

    fn obtain_jacobian(&self, ds: &mut DataStore, _sec: &StepErrorControl) {
        ds.jacobian.linear_combo(
            self.regularization,
            &ds.dae_matrices.dqdx,
            1.0,
            &ds.dae_matrices.dfdx,
        );
    }

    fn update_state_deriv(&self, ds: &mut DataStore, _sec: &StepErrorControl) {
        ds.next_state_deriv.fill(0.0);
    }

    fn compute_error_estimate(&mut self, _ds: &mut DataStore, _sec: &StepErrorControl) -> f64 {
        0.0
    }

    fn update_history(&mut self, _ds: &mut DataStore, _sec: &mut StepErrorControl) {}

    fn restore_history(&mut self, _ds: &mut DataStore, _sec: &mut StepErrorControl) {}

    fn check_reduce_order(&mut self, _ds: &mut DataStore, sec: &mut StepErrorControl) {
        sec.new_order = sec.current_order;
    }

    fn reject_step(&mut self, _ds: &mut DataStore, _sec: &mut StepErrorControl) {}

    fn complete_step(&mut self, _ds: &mut DataStore, _sec: &mut StepErrorControl) {}

    fn interpolate_solution(
        &self,
        ds: &DataStore,
        _sec: &StepErrorControl,
        _t: f64,
    ) -> Option<DVector<f64>> {
        Some(ds.curr_solution.clone())
    }

    fn leading_coeff(&self, _sec: &StepErrorControl) -> f64 {
        self.regularization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tia::params::TiaParams;
    use nalgebra::dvector;
    use spicier_core::SystemSizes;

    #[test]
    fn residual_is_negated_f() {
        let mut ds = DataStore::new(SystemSizes::new(2, 0, 0), 1);
        let sec = StepErrorControl::new(&TiaParams::default());
        let method = NoTimeIntegration::default();
        ds.dae.q = dvector![5.0, 5.0];
        ds.dae.f = dvector![1.0, -2.0];
        ds.dae.dfdx_dvp = dvector![0.5, 0.0];

        method.obtain_residual(&mut ds, &sec, false);
        assert_eq!(ds.rhs, dvector![-1.0, 2.0]);
        method.obtain_residual(&mut ds, &sec, true);
        assert_eq!(ds.rhs, dvector![-0.5, 2.0]);
    }

    #[test]
    fn jacobian_regularizes_charge_terms() {
        let mut ds = DataStore::new(SystemSizes::new(1, 0, 0), 1);
        let sec = StepErrorControl::new(&TiaParams::default());
        let method = NoTimeIntegration::new(1e-12);
        ds.dae_matrices.dqdx.add(0, 0, 1e-9);
        ds.dae_matrices.dfdx.add(0, 0, 0.0);
        method.obtain_jacobian(&mut ds, &sec);
        assert!((ds.jacobian.get(0, 0) - 1e-21).abs() < 1e-30);
        assert_eq!(method.leading_coeff(&sec), 1e-12);
    }

    #[test]
    fn error_estimate_is_zero() {
        let mut ds = DataStore::new(SystemSizes::new(1, 0, 0), 1);
        let sec = StepErrorControl::new(&TiaParams::default());
        ds.newton_correction = dvector![100.0];
        assert_eq!(
            NoTimeIntegration::default().compute_error_estimate(&mut ds, &sec),
            0.0
        );
    }
}
