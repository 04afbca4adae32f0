//! Nonlinear solver parameters.

use serde::{Deserialize, Serialize};

/// Globalization applied to each Newton direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Take the full Newton step.
    #[default]
    Full,
    /// Halve the step until the residual norm decreases.
    Divide,
    /// Armijo backtracking with quadratic interpolation of the step length.
    Backtrack,
    /// Armijo backtracking by repeated halving.
    SimpleBacktrack,
    /// Bank-Rose damping `1 / (1 + K·||F||)`.
    BankRose,
    /// Full step with every component capped at the voltage limit.
    SpiceNewton,
}

impl SearchMethod {
    /// Parse a name or the numeric option code.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "full" | "0" => Some(Self::Full),
            "divide" | "1" => Some(Self::Divide),
            "backtrack" | "2" => Some(Self::Backtrack),
            "simplebacktrack" | "3" => Some(Self::SimpleBacktrack),
            "bankrose" | "banks" | "4" => Some(Self::BankRose),
            "spicenewton" | "spice" | "5" => Some(Self::SpiceNewton),
            _ => None,
        }
    }
}

/// Newton variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NlStrategy {
    /// Fresh Jacobian every iteration.
    #[default]
    Newton,
    /// Keep the factored Jacobian while the residual contracts fast enough.
    ModifiedNewton,
}

impl NlStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "newton" | "0" => Some(Self::Newton),
            "modified" | "modifiednewton" | "1" => Some(Self::ModifiedNewton),
            _ => None,
        }
    }
}

/// Newton tolerances, iteration limits and globalization settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NlParams {
    /// Absolute part of the update weights.
    pub abs_tol: f64,
    /// Relative part of the update weights.
    pub rel_tol: f64,
    /// Weighted update norm required for convergence.
    pub delta_x_tol: f64,
    /// Unweighted residual 2-norm required for convergence. The residual
    /// is in equation units (currents, charge rates), so the solution
    /// weights do not apply to it.
    pub rhs_tol: f64,
    /// Weighted update norm below which progress has stopped.
    pub small_update_tol: f64,
    pub max_newton_step: usize,
    /// Trial step lengths allowed per line search.
    pub max_search_step: usize,
    pub min_iterations: usize,
    pub search_method: SearchMethod,
    pub strategy: NlStrategy,
    /// Contraction ratio above which modified Newton refactors.
    pub mod_newton_refactor_ratio: f64,
    /// Use Eisenstat-Walker forcing terms with iterative linear solvers.
    pub forcing_flag: bool,
    /// Initial forcing term.
    pub eta: f64,
    /// Line-search step-length shrink bounds.
    pub bt_lower: f64,
    pub bt_upper: f64,
    /// Clip steps against the global bounds below.
    pub constraint_bt: bool,
    pub global_bt_min: f64,
    pub global_bt_max: f64,
    /// Largest relative change of any component in one step.
    pub global_bt_change: f64,
    /// Per-component cap used by [`SearchMethod::SpiceNewton`].
    pub spice_vlimit: f64,
}

impl Default for NlParams {
    fn default() -> Self {
        Self::dc()
    }
}

impl NlParams {
    /// Operating-point settings.
    pub fn dc() -> Self {
        Self {
            abs_tol: 1.0e-12,
            rel_tol: 1.0e-3,
            delta_x_tol: 1.0,
            rhs_tol: 1.0e-6,
            small_update_tol: 1.0e-6,
            max_newton_step: 200,
            max_search_step: 9,
            min_iterations: 1,
            search_method: SearchMethod::Full,
            strategy: NlStrategy::Newton,
            mod_newton_refactor_ratio: 0.5,
            forcing_flag: false,
            eta: 0.1,
            bt_lower: 0.1,
            bt_upper: 0.5,
            constraint_bt: false,
            global_bt_min: -f64::MAX,
            global_bt_max: f64::MAX,
            global_bt_change: f64::MAX,
            spice_vlimit: 0.5,
        }
    }

    /// Per-time-step settings: looser, fewer iterations.
    pub fn transient() -> Self {
        Self {
            abs_tol: 1.0e-6,
            rel_tol: 1.0e-2,
            delta_x_tol: 0.33,
            rhs_tol: 1.0e-2,
            max_newton_step: 20,
            max_search_step: 2,
            ..Self::dc()
        }
    }

    pub fn with_search_method(mut self, method: SearchMethod) -> Self {
        self.search_method = method;
        self
    }

    pub fn with_strategy(mut self, strategy: NlStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_newton_step(mut self, steps: usize) -> Self {
        self.max_newton_step = steps;
        self
    }

    pub fn with_tolerances(mut self, rel_tol: f64, abs_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self.abs_tol = abs_tol;
        self
    }

    pub fn with_forcing(mut self, enabled: bool) -> Self {
        self.forcing_flag = enabled;
        self
    }

    pub fn with_constraints(mut self, min: f64, max: f64, change: f64) -> Self {
        self.constraint_bt = true;
        self.global_bt_min = min;
        self.global_bt_max = max;
        self.global_bt_change = change;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_where_expected() {
        let dc = NlParams::dc();
        let tran = NlParams::transient();
        assert_eq!(dc.max_newton_step, 200);
        assert_eq!(dc.max_search_step, 9);
        assert_eq!(tran.max_newton_step, 20);
        assert_eq!(tran.delta_x_tol, 0.33);
        assert_eq!(tran.rhs_tol, 1.0e-2);
        assert_eq!(tran.small_update_tol, dc.small_update_tol);
        assert_eq!(NlParams::default(), dc);
    }

    #[test]
    fn names_and_codes() {
        assert_eq!(SearchMethod::from_name("2"), Some(SearchMethod::Backtrack));
        assert_eq!(SearchMethod::from_name("BankRose"), Some(SearchMethod::BankRose));
        assert_eq!(SearchMethod::from_name("linesearch"), None);
        assert_eq!(NlStrategy::from_name("1"), Some(NlStrategy::ModifiedNewton));
    }
}
