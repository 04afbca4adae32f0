//! Small circuits for the analysis tests.

use nalgebra::DVector;
use spicier_core::{
    DaeMatrices, DaeVectors, Error as CoreError, LoadVectors, Loader, Result as CoreResult,
    SolverState, SystemSizes,
};

/// One Newton entry seen by [`RcLoader`].
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    pub time: f64,
    pub step: f64,
    pub order: usize,
}

/// Source `vs` driving capacitor `c` through resistor `r`, one unknown:
/// `d(c·v)/dt + (v - vs(t))/r = 0`.
pub struct RcLoader {
    pub r: f64,
    pub c: f64,
    pub vs: f64,
    pub breakpoints: Vec<f64>,
    /// `vs` is zero before this time.
    pub source_step: Option<f64>,
    /// The residual turns NaN after this time.
    pub fail_after: Option<f64>,
    pub attempts: Vec<Attempt>,
}

impl RcLoader {
    pub fn new(r: f64, c: f64, vs: f64) -> Self {
        Self {
            r,
            c,
            vs,
            breakpoints: Vec::new(),
            source_step: None,
            fail_after: None,
            attempts: Vec::new(),
        }
    }

    pub fn with_breakpoints(mut self, breakpoints: Vec<f64>) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn with_source_step(mut self, at: f64) -> Self {
        self.source_step = Some(at);
        self
    }

    pub fn failing_after(mut self, t: f64) -> Self {
        self.fail_after = Some(t);
        self
    }

    fn source(&self, state: &SolverState) -> f64 {
        match self.source_step {
            Some(at) if state.transient_flag && state.current_time < at => 0.0,
            _ => self.vs,
        }
    }
}

impl Loader for RcLoader {
    fn sizes(&self) -> SystemSizes {
        SystemSizes::new(1, 0, 0)
    }

    fn update_state(&mut self, _vecs: &mut LoadVectors<'_>, state: &SolverState) -> CoreResult<()> {
        if state.transient_flag && state.newton_iter == 0 {
            self.attempts.push(Attempt {
                time: state.current_time,
                step: state.current_time_step,
                order: state.current_order,
            });
        }
        Ok(())
    }

    fn load_dae_vectors(
        &mut self,
        vecs: &mut LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeVectors,
    ) -> CoreResult<()> {
        let v = vecs.next_solution[0];
        out.q[0] += self.c * v;
        let failing = self
            .fail_after
            .is_some_and(|t| state.transient_flag && state.current_time > t);
        out.f[0] += if failing {
            f64::NAN
        } else {
            (v - self.source(state)) / self.r
        };
        Ok(())
    }

    fn load_dae_matrices(
        &mut self,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) -> CoreResult<()> {
        out.dqdx.add(0, 0, self.c);
        out.dfdx.add(0, 0, 1.0 / self.r);
        Ok(())
    }

    fn breakpoints(&self, start: f64, end: f64) -> Vec<f64> {
        self.breakpoints
            .iter()
            .copied()
            .filter(|&t| t > start && t <= end)
            .collect()
    }

    fn set_initial_guess(&mut self, solution: &mut DVector<f64>) {
        solution.fill(0.0);
    }

    fn set_param(&mut self, name: &str, value: f64) -> CoreResult<()> {
        match name.to_uppercase().as_str() {
            "R" => self.r = value,
            "C" => self.c = value,
            "VS" => self.vs = value,
            _ => return Err(CoreError::UnknownParameter(name.to_string())),
        }
        Ok(())
    }
}

/// `atan(x - 5) = 0`: plain Newton from zero overshoots and diverges.
pub struct AtanLoader;

impl Loader for AtanLoader {
    fn sizes(&self) -> SystemSizes {
        SystemSizes::new(1, 0, 0)
    }

    fn update_state(&mut self, _vecs: &mut LoadVectors<'_>, _state: &SolverState) -> CoreResult<()> {
        Ok(())
    }

    fn load_dae_vectors(
        &mut self,
        vecs: &mut LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) -> CoreResult<()> {
        out.f[0] += (vecs.next_solution[0] - 5.0).atan();
        Ok(())
    }

    fn load_dae_matrices(
        &mut self,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) -> CoreResult<()> {
        let d = vecs.next_solution[0] - 5.0;
        out.dfdx.add(0, 0, 1.0 / (1.0 + d * d));
        Ok(())
    }
}

/// A current source into a node with no DC path: singular at DC.
pub struct FloatingLoader;

impl Loader for FloatingLoader {
    fn sizes(&self) -> SystemSizes {
        SystemSizes::new(1, 0, 0)
    }

    fn update_state(&mut self, _vecs: &mut LoadVectors<'_>, _state: &SolverState) -> CoreResult<()> {
        Ok(())
    }

    fn load_dae_vectors(
        &mut self,
        _vecs: &mut LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) -> CoreResult<()> {
        out.f[0] -= 1e-3;
        Ok(())
    }

    fn load_dae_matrices(
        &mut self,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        _out: &mut DaeMatrices,
    ) -> CoreResult<()> {
        Ok(())
    }
}
