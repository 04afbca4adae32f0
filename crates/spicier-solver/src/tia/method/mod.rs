//! Time integration methods.
//!
//! Every method turns the DAE `dQ/dt + F = 0` into an algebraic system for
//! the next time point by replacing `dQ/dt` with a discrete formula. The
//! methods keep no vectors of their own: everything lives in the
//! [`DataStore`] and [`StepErrorControl`] passed to each call.

mod bdf15;
mod no_integration;
mod one_step;

pub use bdf15::Bdf15;
pub use no_integration::NoTimeIntegration;
pub use one_step::OneStep;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::data_store::DataStore;
use super::params::TiaParams;
use super::step_error_control::StepErrorControl;

/// Available integration methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMethodKind {
    /// Variable-order BDF, orders 1 through 5.
    #[default]
    Bdf,
    /// Backward Euler start followed by the trapezoidal rule.
    Trapezoidal,
    /// No time derivative; used for the operating point.
    None,
}

impl IntegrationMethodKind {
    /// Parse from a string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bdf" | "gear" | "bdf15" | "1" => Some(Self::Bdf),
            "trap" | "trapezoidal" | "onestep" | "7" => Some(Self::Trapezoidal),
            "none" | "dcop" | "0" => Some(Self::None),
            _ => None,
        }
    }

    /// Highest order the formula family supports.
    pub fn method_max_order(&self) -> usize {
        match self {
            Self::Bdf => 5,
            Self::Trapezoidal => 2,
            Self::None => 1,
        }
    }

    /// Build the method.
    pub fn create(&self, params: &TiaParams) -> Box<dyn TimeIntegrationMethod> {
        match self {
            Self::Bdf => Box::new(Bdf15::new()),
            Self::Trapezoidal => Box::new(OneStep::new()),
            Self::None => Box::new(NoTimeIntegration::new(params.dcop_regularization)),
        }
    }
}

/// A discretization of `dQ/dt` together with its step/order policy.
///
/// Call order within one step attempt is fixed: `update_coeffs`,
/// `obtain_predictor`, then any number of `obtain_residual` /
/// `obtain_jacobian` pairs inside Newton, then `compute_error_estimate` and
/// either `complete_step` or `reject_step`.
pub trait TimeIntegrationMethod {
    fn kind(&self) -> IntegrationMethodKind;

    fn name(&self) -> &'static str;

    /// Highest order this method will use.
    fn max_order(&self) -> usize {
        self.kind().method_max_order()
    }

    /// Set up history and the first step right after the operating point
    /// or a breakpoint.
    fn initialize(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Recompute the formula coefficients for the current step and order.
    fn update_coeffs(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Fill the predictors and seed `next_solution` with `xn0`.
    fn obtain_predictor(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Newton right-hand side from the freshly loaded Q and F.
    fn obtain_residual(&self, ds: &mut DataStore, sec: &StepErrorControl, limiting: bool);

    /// Newton Jacobian from the freshly loaded dQ/dx and dF/dx.
    fn obtain_jacobian(&self, ds: &mut DataStore, sec: &StepErrorControl);

    /// Jacobian action from precomputed `dQ/dx·v` and `dF/dx·v`.
    fn apply_jacobian(
        &self,
        sec: &StepErrorControl,
        dqdx_v: &DVector<f64>,
        dfdx_v: &DVector<f64>,
        result: &mut DVector<f64>,
    ) {
        *result = dqdx_v * self.leading_coeff(sec) + dfdx_v;
    }

    /// Discrete derivative of the device state vector.
    fn update_state_deriv(&self, ds: &mut DataStore, sec: &StepErrorControl);

    /// Local error over tolerance for the converged step.
    fn compute_error_estimate(&mut self, ds: &mut DataStore, sec: &StepErrorControl) -> f64;

    /// Fold the accepted correction into the history.
    fn update_history(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Undo the predictor's history changes after a rejected step.
    fn restore_history(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Decide whether the order should drop and set `sec.est`.
    fn check_reduce_order(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Choose the step and order to retry with after a failure.
    fn reject_step(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Commit an accepted step and choose the next step and order.
    fn complete_step(&mut self, ds: &mut DataStore, sec: &mut StepErrorControl);

    /// Solution at `t` within the last accepted step, or `None` when `t`
    /// lies outside it.
    fn interpolate_solution(
        &self,
        ds: &DataStore,
        sec: &StepErrorControl,
        t: f64,
    ) -> Option<DVector<f64>>;

    /// Coefficient on dQ/dx in the Jacobian.
    fn leading_coeff(&self, sec: &StepErrorControl) -> f64;
}

/// Where an interpolation request falls relative to the last step.
pub(crate) enum Endpoint {
    /// On an accepted point; the stored vector is returned as is.
    Exact(DVector<f64>),
    Outside,
    Interior,
}

/// Accepted endpoints are returned exactly; anything outside the step is
/// refused.
pub(crate) fn classify_time(ds: &DataStore, sec: &StepErrorControl, t: f64) -> Endpoint {
    let fuzz = 100.0 * f64::EPSILON * (sec.current_time.abs() + sec.current_time_step.abs());
    if (t - sec.current_time).abs() <= fuzz {
        Endpoint::Exact(ds.curr_solution.clone())
    } else if (t - sec.last_time).abs() <= fuzz {
        Endpoint::Exact(ds.last_solution.clone())
    } else if t > sec.current_time || t < sec.last_time {
        Endpoint::Outside
    } else {
        Endpoint::Interior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_name() {
        assert_eq!(IntegrationMethodKind::from_name("BDF"), Some(IntegrationMethodKind::Bdf));
        assert_eq!(
            IntegrationMethodKind::from_name("trap"),
            Some(IntegrationMethodKind::Trapezoidal)
        );
        assert_eq!(IntegrationMethodKind::from_name("none"), Some(IntegrationMethodKind::None));
        assert_eq!(IntegrationMethodKind::from_name("rk4"), None);
    }

    #[test]
    fn factory_matches_kind() {
        let params = TiaParams::default();
        for kind in [
            IntegrationMethodKind::Bdf,
            IntegrationMethodKind::Trapezoidal,
            IntegrationMethodKind::None,
        ] {
            let method = kind.create(&params);
            assert_eq!(method.kind(), kind);
            assert_eq!(method.max_order(), kind.method_max_order());
        }
    }
}
