//! Residual and Jacobian assembly.
//!
//! The [`Assembler`] sits between the nonlinear solver and the device loader:
//! it asks the loader for Q, F and their derivatives at the trial solution and
//! lets the active integration method combine them into the Newton system.

use std::time::{Duration, Instant};

use nalgebra::DVector;
use spicier_core::{Loader, SolverState, VariableKind};

use crate::error::{Error, Result};
use crate::nonlinear::NonlinearProblem;
use crate::tia::{DataStore, StepErrorControl, TimeIntegrationMethod};

/// Load counters and timers.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    pub residual_time: Duration,
    pub jacobian_time: Duration,
    pub residual_count: usize,
    pub jacobian_count: usize,
    rhs_loaded: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a residual has been loaded since the last Jacobian.
    pub fn rhs_loaded(&self) -> bool {
        self.rhs_loaded
    }

    /// Evaluate the Newton right-hand side at `ds.next_solution`.
    ///
    /// Leaves `ds.dae` holding Q and F for the trial point, which the step
    /// controller reads after convergence.
    pub fn load_rhs(
        &mut self,
        loader: &mut dyn Loader,
        ds: &mut DataStore,
        sec: &StepErrorControl,
        method: &dyn TimeIntegrationMethod,
        state: &SolverState,
    ) -> Result<()> {
        let start = Instant::now();

        ds.dae.zero();
        {
            let (mut vecs, _, _) = ds.load_view();
            loader.update_state(&mut vecs, state)?;
        }
        method.update_state_deriv(ds, sec);
        {
            let (mut vecs, dae, _) = ds.load_view();
            loader.load_dae_vectors(&mut vecs, state, dae)?;
        }
        let limiting = loader.limiter_enabled();
        method.obtain_residual(ds, sec, limiting);

        if state.gmin_scale > 0.0 {
            for i in voltage_nodes(ds) {
                ds.rhs[i] -= state.gmin_scale * ds.next_solution[i];
            }
        }

        self.rhs_loaded = true;
        self.residual_count += 1;
        self.residual_time += start.elapsed();
        Ok(())
    }

    /// Evaluate the Newton Jacobian for the point of the last residual load.
    pub fn load_jacobian(
        &mut self,
        loader: &mut dyn Loader,
        ds: &mut DataStore,
        sec: &StepErrorControl,
        method: &dyn TimeIntegrationMethod,
        state: &SolverState,
    ) -> Result<()> {
        if !self.rhs_loaded {
            log::error!("Jacobian requested before the residual was loaded");
            return Err(Error::SolverError(
                "Jacobian load requires a residual load first".to_string(),
            ));
        }
        let start = Instant::now();

        ds.dae_matrices.zero();
        {
            let (vecs, _, mats) = ds.load_view();
            loader.load_dae_matrices(&vecs, state, mats)?;
        }
        method.obtain_jacobian(ds, sec);

        if state.gmin_scale > 0.0 {
            for i in voltage_nodes(ds) {
                ds.jacobian.add(i, i, state.gmin_scale);
            }
        }

        self.rhs_loaded = false;
        self.jacobian_count += 1;
        self.jacobian_time += start.elapsed();
        Ok(())
    }

    /// Jacobian action `J·input` without forming `J`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_jacobian(
        &mut self,
        loader: &mut dyn Loader,
        ds: &mut DataStore,
        sec: &StepErrorControl,
        method: &dyn TimeIntegrationMethod,
        state: &SolverState,
        input: &DVector<f64>,
        result: &mut DVector<f64>,
    ) -> Result<()> {
        let n = input.len();
        let mut dqdx_v = DVector::zeros(n);
        let mut dfdx_v = DVector::zeros(n);
        {
            let (vecs, _, _) = ds.load_view();
            loader.apply_dae_matrices(&vecs, state, input, &mut dqdx_v, &mut dfdx_v)?;
        }
        method.apply_jacobian(sec, &dqdx_v, &dfdx_v, result);

        if state.gmin_scale > 0.0 {
            for i in voltage_nodes(ds) {
                result[i] += state.gmin_scale * input[i];
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn voltage_nodes(ds: &DataStore) -> Vec<usize> {
    ds.variable_kinds()
        .iter()
        .enumerate()
        .filter(|(_, kind)| **kind == VariableKind::Voltage)
        .map(|(i, _)| i)
        .collect()
}

/// Everything one nonlinear solve needs, borrowed for its duration.
pub struct CircuitSystem<'a> {
    pub loader: &'a mut dyn Loader,
    pub ds: &'a mut DataStore,
    pub sec: &'a StepErrorControl,
    pub method: &'a dyn TimeIntegrationMethod,
    pub state: &'a mut SolverState,
    pub assembler: &'a mut Assembler,
}

impl NonlinearProblem for CircuitSystem<'_> {
    fn size(&self) -> usize {
        self.ds.solution_size()
    }

    fn solution(&self) -> &DVector<f64> {
        &self.ds.next_solution
    }

    fn solution_mut(&mut self) -> &mut DVector<f64> {
        &mut self.ds.next_solution
    }

    fn set_iteration(&mut self, iteration: usize) {
        self.state.newton_iter = iteration;
    }

    fn load_rhs(&mut self) -> Result<()> {
        self.assembler
            .load_rhs(self.loader, self.ds, self.sec, self.method, self.state)
    }

    fn rhs(&self) -> &DVector<f64> {
        &self.ds.rhs
    }

    fn load_jacobian(&mut self) -> Result<()> {
        self.assembler
            .load_jacobian(self.loader, self.ds, self.sec, self.method, self.state)
    }

    fn jacobian(&self) -> &spicier_core::DaeMatrix {
        &self.ds.jacobian
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tia::{NoTimeIntegration, TiaParams};
    use nalgebra::dvector;
    use spicier_core::{DaeMatrices, DaeVectors, LoadVectors, SystemSizes};

    /// Two nodes: 1 S to ground from node 0, 1 F from node 1 to ground,
    /// 2 A injected into node 0.
    struct Linear;

    impl Loader for Linear {
        fn sizes(&self) -> SystemSizes {
            SystemSizes::new(2, 0, 0)
        }

        fn update_state(
            &mut self,
            _vecs: &mut LoadVectors<'_>,
            _state: &SolverState,
        ) -> spicier_core::Result<()> {
            Ok(())
        }

        fn load_dae_vectors(
            &mut self,
            vecs: &mut LoadVectors<'_>,
            _state: &SolverState,
            out: &mut DaeVectors,
        ) -> spicier_core::Result<()> {
            let x = vecs.next_solution;
            out.f[0] = x[0] - 2.0;
            out.q[1] = x[1];
            Ok(())
        }

        fn load_dae_matrices(
            &mut self,
            _vecs: &LoadVectors<'_>,
            _state: &SolverState,
            out: &mut DaeMatrices,
        ) -> spicier_core::Result<()> {
            out.dfdx.add(0, 0, 1.0);
            out.dqdx.add(1, 1, 1.0);
            Ok(())
        }
    }

    fn setup() -> (DataStore, StepErrorControl, NoTimeIntegration) {
        let ds = DataStore::new(SystemSizes::new(2, 0, 0), 1);
        let sec = StepErrorControl::new(&TiaParams::default());
        (ds, sec, NoTimeIntegration::new(1e-3))
    }

    #[test]
    fn jacobian_requires_residual() {
        let (mut ds, sec, method) = setup();
        let mut asm = Assembler::new();
        let state = SolverState::new();
        let err = asm.load_jacobian(&mut Linear, &mut ds, &sec, &method, &state);
        assert!(err.is_err());

        asm.load_rhs(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        asm.load_jacobian(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        assert_eq!(asm.residual_count, 1);
        assert_eq!(asm.jacobian_count, 1);
        assert!(!asm.rhs_loaded());
    }

    #[test]
    fn residual_and_jacobian_values() {
        let (mut ds, sec, method) = setup();
        let mut asm = Assembler::new();
        let state = SolverState::new();
        ds.next_solution = dvector![1.0, 0.5];

        asm.load_rhs(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        assert_eq!(ds.rhs, dvector![1.0, 0.0]);
        assert_eq!(ds.dae.q, dvector![0.0, 0.5]);

        asm.load_jacobian(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        assert_eq!(ds.jacobian.get(0, 0), 1.0);
        assert!((ds.jacobian.get(1, 1) - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn gmin_adds_conductance_to_voltage_nodes() {
        let (mut ds, sec, method) = setup();
        let mut asm = Assembler::new();
        let mut state = SolverState::new();
        state.gmin_scale = 0.1;
        ds.next_solution = dvector![2.0, 1.0];

        asm.load_rhs(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        assert!((ds.rhs[0] + 0.2).abs() < 1e-12);
        assert!((ds.rhs[1] + 0.1).abs() < 1e-12);

        asm.load_jacobian(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        assert!((ds.jacobian.get(1, 1) - 0.101).abs() < 1e-12);
    }

    #[test]
    fn matrix_free_action_matches_assembled() {
        let (mut ds, sec, method) = setup();
        let mut asm = Assembler::new();
        let state = SolverState::new();
        asm.load_rhs(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();
        asm.load_jacobian(&mut Linear, &mut ds, &sec, &method, &state)
            .unwrap();

        let v = dvector![3.0, -4.0];
        let assembled = ds.jacobian.mul_vec(&v);
        let mut action = DVector::zeros(2);
        asm.apply_jacobian(&mut Linear, &mut ds, &sec, &method, &state, &v, &mut action)
            .unwrap();
        assert!((assembled - action).norm() < 1e-14);
    }
}
