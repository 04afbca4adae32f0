//! Passive elements: R, C, L.

use spicier_core::{DaeMatrices, DaeVectors, LoadVectors, SolverState};

use crate::device::Device;
use crate::stamp::{Layout, add_conductance, add_entry, add_pair, voltage};

/// Linear resistor; contributes `(va - vb) / r` to F.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub resistance: f64,
}

impl Resistor {
    pub fn new(name: impl Into<String>, a: Option<usize>, b: Option<usize>, resistance: f64) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            resistance,
        }
    }

    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }
}

impl Device for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.a, self.b]
    }

    fn load_vectors(
        &self,
        _layout: Layout,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) {
        let i = self.conductance() * voltage(vecs.next_solution, self.a, self.b);
        add_pair(&mut out.f, self.a, self.b, i);
    }

    fn load_matrices(
        &self,
        _layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        add_conductance(&mut out.dfdx, self.a, self.b, self.conductance());
    }

    fn value(&self) -> f64 {
        self.resistance
    }

    fn set_value(&mut self, value: f64) {
        self.resistance = value;
    }
}

/// Linear capacitor; contributes `c (va - vb)` to Q.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub capacitance: f64,
}

impl Capacitor {
    pub fn new(name: impl Into<String>, a: Option<usize>, b: Option<usize>, capacitance: f64) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            capacitance,
        }
    }
}

impl Device for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.a, self.b]
    }

    fn load_vectors(
        &self,
        _layout: Layout,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) {
        let q = self.capacitance * voltage(vecs.next_solution, self.a, self.b);
        add_pair(&mut out.q, self.a, self.b, q);
    }

    fn load_matrices(
        &self,
        _layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        add_conductance(&mut out.dqdx, self.a, self.b, self.capacitance);
    }

    fn value(&self) -> f64 {
        self.capacitance
    }

    fn set_value(&mut self, value: f64) {
        self.capacitance = value;
    }
}

/// Linear inductor with its current as a branch unknown.
///
/// Branch row: `d(L i)/dt - (va - vb) = 0`; the current leaves `a` and
/// enters `b`.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub inductance: f64,
    /// Branch slot, offset by the node count at load time.
    pub branch: usize,
}

impl Inductor {
    pub fn new(
        name: impl Into<String>,
        a: Option<usize>,
        b: Option<usize>,
        inductance: f64,
        branch: usize,
    ) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            inductance,
            branch,
        }
    }
}

impl Device for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.a, self.b]
    }

    fn branch_count(&self) -> usize {
        1
    }

    fn load_vectors(
        &self,
        layout: Layout,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) {
        let br = layout.branch(self.branch);
        let x = vecs.next_solution;
        let current = x[br];
        add_pair(&mut out.f, self.a, self.b, current);
        out.q[br] += self.inductance * current;
        out.f[br] -= voltage(x, self.a, self.b);
    }

    fn load_matrices(
        &self,
        layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        let br = Some(layout.branch(self.branch));
        add_entry(&mut out.dfdx, self.a, br, 1.0);
        add_entry(&mut out.dfdx, self.b, br, -1.0);
        add_entry(&mut out.dfdx, br, self.a, -1.0);
        add_entry(&mut out.dfdx, br, self.b, 1.0);
        add_entry(&mut out.dqdx, br, br, self.inductance);
    }

    fn value(&self) -> f64 {
        self.inductance
    }

    fn set_value(&mut self, value: f64) {
        self.inductance = value;
    }
}
