//! Option-block surface for a simulation run.
//!
//! [`SimulationOptions`] is what a netlist's `.OPTIONS TIMEINT`, `NONLIN`,
//! `NONLIN-TRAN` and `LINSOL` blocks (plus `.TRAN` and `.STEP`) boil down
//! to. Every field has a default, so a JSON file only needs the keys it
//! changes:
//!
//! ```json
//! { "analysis": "transient", "final_time": 1e-3, "integration_method": "trapezoidal",
//!   "nonlin_tran": { "max_steps": 30 }, "step": [".STEP PARAM=R1 LIST 1k 2k"] }
//! ```

use std::collections::BTreeMap;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisConfig, AnalysisKind, GminStepping};
use crate::dispatch::{LinearSolverConfig, LinearSolverKind};
use crate::error::{Error, Result};
use crate::nonlinear::{NlParams, NlStrategy, SearchMethod};
use crate::tia::{IntegrationMethodKind, TiaParams};

/// Overrides applied on top of the DC or transient Newton presets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    pub strategy: Option<NlStrategy>,
    pub search_method: Option<SearchMethod>,
    pub max_steps: Option<usize>,
    pub rel_tol: Option<f64>,
    pub abs_tol: Option<f64>,
    pub delta_x_tol: Option<f64>,
    pub rhs_tol: Option<f64>,
    /// Inexact Newton: pass the forcing term to iterative linear solvers.
    pub forcing: Option<bool>,
}

impl NewtonOptions {
    pub fn apply(&self, mut params: NlParams) -> NlParams {
        if let Some(strategy) = self.strategy {
            params.strategy = strategy;
        }
        if let Some(method) = self.search_method {
            params.search_method = method;
        }
        if let Some(steps) = self.max_steps {
            params.max_newton_step = steps;
        }
        if let Some(tol) = self.rel_tol {
            params.rel_tol = tol;
        }
        if let Some(tol) = self.abs_tol {
            params.abs_tol = tol;
        }
        if let Some(tol) = self.delta_x_tol {
            params.delta_x_tol = tol;
        }
        if let Some(tol) = self.rhs_tol {
            params.rhs_tol = tol;
        }
        if let Some(forcing) = self.forcing {
            params.forcing_flag = forcing;
        }
        params
    }
}

/// Everything needed to build and run one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    pub analysis: AnalysisKind,
    pub integration_method: IntegrationMethodKind,
    pub max_order: usize,
    pub min_order: usize,
    pub rel_error_tol: f64,
    pub abs_error_tol: f64,
    pub initial_time: f64,
    pub final_time: f64,
    pub output_start_time: f64,
    pub output_interval: Option<f64>,
    pub starting_time_step: f64,
    pub max_time_step: Option<f64>,
    pub user_min_time_step: f64,
    pub constant_step_size: bool,
    pub min_time_step_recovery_counter: usize,
    pub test_first_step: bool,
    pub fast_tests: bool,
    pub pass_nl_stall: bool,
    pub bp_enable: bool,
    pub no_dcop: bool,
    pub double_dcop: bool,
    pub history_tracking_depth: usize,
    pub dcop_regularization: f64,
    pub gmin_stepping: bool,
    pub nonlin: NewtonOptions,
    pub nonlin_tran: NewtonOptions,
    pub linear_solver: LinearSolverKind,
    pub sparse_threshold: Option<usize>,
    /// `.STEP` lines, one parameter each.
    pub step: Vec<String>,
    /// Keys nobody asked for; reported and otherwise ignored.
    #[serde(flatten, skip_serializing)]
    pub unrecognized: BTreeMap<String, IgnoredAny>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        let tia = TiaParams::default();
        Self {
            analysis: AnalysisKind::Dcop,
            integration_method: tia.integration_method,
            max_order: tia.max_order,
            min_order: tia.min_order,
            rel_error_tol: tia.rel_error_tol,
            abs_error_tol: tia.abs_error_tol,
            initial_time: tia.initial_time,
            final_time: tia.final_time,
            output_start_time: tia.output_start_time,
            output_interval: tia.output_interval,
            starting_time_step: tia.starting_time_step,
            max_time_step: tia.max_time_step,
            user_min_time_step: tia.user_spec_min_time_step,
            constant_step_size: tia.constant_step_size,
            min_time_step_recovery_counter: tia.min_time_step_recovery_counter,
            test_first_step: tia.test_first_step,
            fast_tests: tia.fast_tests,
            pass_nl_stall: tia.pass_nl_stall,
            bp_enable: tia.bp_enable,
            no_dcop: tia.no_dcop,
            double_dcop: tia.double_dcop,
            history_tracking_depth: tia.history_tracking_depth,
            dcop_regularization: tia.dcop_regularization,
            gmin_stepping: true,
            nonlin: NewtonOptions::default(),
            nonlin_tran: NewtonOptions::default(),
            linear_solver: LinearSolverKind::Auto,
            sparse_threshold: None,
            step: Vec::new(),
            unrecognized: BTreeMap::new(),
        }
    }
}

impl SimulationOptions {
    /// A transient run from 0 to `final_time` with default settings.
    pub fn transient(final_time: f64) -> Self {
        Self {
            analysis: AnalysisKind::Transient,
            final_time,
            ..Default::default()
        }
    }

    /// Reject contradictory settings; warn about unknown keys.
    pub fn validate(&self) -> Result<()> {
        for key in self.unrecognized.keys() {
            log::warn!("ignoring unrecognized option '{}'", key);
        }
        if self.max_order == 0 {
            return Err(invalid("max_order must be at least 1"));
        }
        if self.min_order > self.max_order {
            return Err(Error::InvalidOption(format!(
                "min_order {} exceeds max_order {}",
                self.min_order, self.max_order
            )));
        }
        if !(self.rel_error_tol > 0.0 && self.abs_error_tol > 0.0) {
            return Err(invalid("error tolerances must be positive"));
        }
        if self.output_interval.is_some_and(|dt| !(dt > 0.0)) {
            return Err(invalid("output_interval must be positive"));
        }
        if self.max_time_step.is_some_and(|h| !(h > 0.0)) {
            return Err(invalid("max_time_step must be positive"));
        }
        if self.analysis == AnalysisKind::Transient {
            if !(self.final_time > self.initial_time) {
                return Err(Error::InvalidOption(format!(
                    "final_time {:e} must be after initial_time {:e}",
                    self.final_time, self.initial_time
                )));
            }
            if !(self.starting_time_step > 0.0) {
                return Err(invalid("starting_time_step must be positive"));
            }
        }
        Ok(())
    }

    pub fn tia_params(&self) -> TiaParams {
        TiaParams {
            integration_method: self.integration_method,
            initial_time: self.initial_time,
            final_time: self.final_time,
            output_start_time: self.output_start_time,
            output_interval: self.output_interval,
            starting_time_step: self.starting_time_step,
            max_time_step: self.max_time_step,
            user_spec_min_time_step: self.user_min_time_step,
            constant_step_size: self.constant_step_size,
            rel_error_tol: self.rel_error_tol,
            abs_error_tol: self.abs_error_tol,
            max_order: self.max_order,
            min_order: self.min_order,
            test_first_step: self.test_first_step,
            min_time_step_recovery_counter: self.min_time_step_recovery_counter,
            fast_tests: self.fast_tests,
            history_tracking_depth: self.history_tracking_depth,
            pass_nl_stall: self.pass_nl_stall,
            dcop_regularization: self.dcop_regularization,
            bp_enable: self.bp_enable,
            double_dcop: self.double_dcop,
            no_dcop: self.no_dcop,
            ..TiaParams::default()
        }
    }

    pub fn dc_params(&self) -> NlParams {
        self.nonlin.apply(NlParams::dc())
    }

    pub fn transient_params(&self) -> NlParams {
        self.nonlin_tran.apply(NlParams::transient())
    }

    pub fn linear_config(&self) -> LinearSolverConfig {
        let config = LinearSolverConfig::default().with_kind(self.linear_solver);
        match self.sparse_threshold {
            Some(threshold) => config.with_sparse_threshold(threshold),
            None => config,
        }
    }

    pub fn gmin_stepping(&self) -> GminStepping {
        if self.gmin_stepping {
            GminStepping::default()
        } else {
            GminStepping::disabled()
        }
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig::new(self.tia_params())
            .with_dc_params(self.dc_params())
            .with_transient_params(self.transient_params())
            .with_linear_solver(self.linear_config())
    }
}

fn invalid(why: &str) -> Error {
    log::error!("invalid option: {}", why);
    Error::InvalidOption(why.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_tia_params() {
        let options = SimulationOptions::default();
        let tia = options.tia_params();
        let reference = TiaParams::default();
        assert_eq!(tia.max_order, reference.max_order);
        assert_eq!(tia.rel_error_tol, reference.rel_error_tol);
        assert_eq!(tia.starting_time_step, reference.starting_time_step);
        assert_eq!(tia.dcop_regularization, 1.0e-20);
        assert_eq!(options.dc_params(), NlParams::dc());
        assert_eq!(options.transient_params(), NlParams::transient());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "analysis": "transient",
            "final_time": 1e-3,
            "integration_method": "trapezoidal",
            "nonlin_tran": { "max_steps": 30, "search_method": "backtrack" },
            "linear_solver": "gmres",
            "step": [".STEP PARAM=R1 LIST 1k 2k"]
        }"#;
        let options: SimulationOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.analysis, AnalysisKind::Transient);
        assert_eq!(options.integration_method, IntegrationMethodKind::Trapezoidal);
        assert_eq!(options.max_order, 5);
        assert!(options.unrecognized.is_empty());

        let tran = options.transient_params();
        assert_eq!(tran.max_newton_step, 30);
        assert_eq!(tran.search_method, SearchMethod::Backtrack);
        assert_eq!(tran.rel_tol, NlParams::transient().rel_tol);
        assert_eq!(options.linear_config().kind, LinearSolverKind::Gmres);
        assert_eq!(options.step.len(), 1);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_collected() {
        let options: SimulationOptions =
            serde_json::from_str(r#"{ "reltol": 1e-4, "max_order": 2 }"#).unwrap();
        assert_eq!(options.max_order, 2);
        assert!(options.unrecognized.contains_key("reltol"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn contradictions_are_rejected() {
        let bad_orders = SimulationOptions {
            min_order: 3,
            max_order: 2,
            ..Default::default()
        };
        assert!(matches!(bad_orders.validate(), Err(Error::InvalidOption(_))));

        let backwards = SimulationOptions {
            initial_time: 1.0,
            ..SimulationOptions::transient(0.5)
        };
        assert!(backwards.validate().is_err());

        let bad_interval = SimulationOptions {
            output_interval: Some(0.0),
            ..SimulationOptions::transient(1.0)
        };
        assert!(bad_interval.validate().is_err());
    }

    #[test]
    fn gmin_switch() {
        let options = SimulationOptions {
            gmin_stepping: false,
            ..Default::default()
        };
        assert!(!options.gmin_stepping().enabled);
        assert!(SimulationOptions::default().gmin_stepping().enabled);
    }
}
