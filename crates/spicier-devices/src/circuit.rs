//! Element list with named nodes, exposed to the solver as a [`Loader`].

use std::collections::HashSet;

use indexmap::IndexMap;
use nalgebra::DVector;
use spicier_core::{
    DaeMatrices, DaeVectors, Error as CoreError, LoadVectors, Loader, Result as CoreResult,
    SolverState, SystemSizes, VariableKind,
};

use crate::device::Device;
use crate::diode::{Diode, DiodeModel};
use crate::error::{Error, Result};
use crate::passive::{Capacitor, Inductor, Resistor};
use crate::sources::{CurrentSource, Vccs, Vcvs, VoltageSource};
use crate::stamp::Layout;
use crate::waveforms::Waveform;

/// A flat circuit: nodes are numbered in order of first use, branch
/// currents follow the nodes.
///
/// ```
/// use spicier_devices::{Circuit, Waveform};
///
/// let mut ckt = Circuit::new();
/// ckt.voltage_source("V1", "in", "0", Waveform::dc(1.0))
///     .resistor("R1", "in", "out", 1e3)
///     .capacitor("C1", "out", "0", 1e-6);
/// assert_eq!(ckt.num_nodes(), 2);
/// assert!(ckt.check().is_ok());
/// ```
#[derive(Debug, Default)]
pub struct Circuit {
    nodes: IndexMap<String, usize>,
    devices: Vec<Box<dyn Device>>,
    num_branches: usize,
    num_stores: usize,
    nodesets: IndexMap<usize, f64>,
    branch_names: Vec<String>,
}

fn is_ground(name: &str) -> bool {
    name == "0" || name.eq_ignore_ascii_case("gnd")
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, adding it on first use; `None` for ground.
    pub fn node(&mut self, name: &str) -> Option<usize> {
        if is_ground(name) {
            return None;
        }
        let next = self.nodes.len();
        Some(*self.nodes.entry(name.to_string()).or_insert(next))
    }

    /// Index of an existing node.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).copied()
    }

    /// Solution index of a branch current, by element name.
    pub fn branch_index(&self, element: &str) -> Option<usize> {
        self.branch_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(element))
            .map(|k| self.layout().branch(k))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_branches(&self) -> usize {
        self.num_branches
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn devices(&self) -> &[Box<dyn Device>] {
        &self.devices
    }

    fn layout(&self) -> Layout {
        Layout {
            num_nodes: self.nodes.len(),
        }
    }

    fn next_branch(&mut self, name: &str) -> usize {
        self.branch_names.push(name.to_string());
        self.num_branches += 1;
        self.num_branches - 1
    }

    pub fn add(&mut self, device: Box<dyn Device>) -> &mut Self {
        self.devices.push(device);
        self
    }

    pub fn resistor(&mut self, name: &str, a: &str, b: &str, resistance: f64) -> &mut Self {
        let (a, b) = (self.node(a), self.node(b));
        self.add(Box::new(Resistor::new(name, a, b, resistance)))
    }

    pub fn capacitor(&mut self, name: &str, a: &str, b: &str, capacitance: f64) -> &mut Self {
        let (a, b) = (self.node(a), self.node(b));
        self.add(Box::new(Capacitor::new(name, a, b, capacitance)))
    }

    pub fn inductor(&mut self, name: &str, a: &str, b: &str, inductance: f64) -> &mut Self {
        let (a, b) = (self.node(a), self.node(b));
        let branch = self.next_branch(name);
        self.add(Box::new(Inductor::new(name, a, b, inductance, branch)))
    }

    pub fn voltage_source(&mut self, name: &str, pos: &str, neg: &str, waveform: Waveform) -> &mut Self {
        let (pos, neg) = (self.node(pos), self.node(neg));
        let branch = self.next_branch(name);
        self.add(Box::new(VoltageSource::new(name, pos, neg, waveform, branch)))
    }

    pub fn current_source(&mut self, name: &str, pos: &str, neg: &str, waveform: Waveform) -> &mut Self {
        let (pos, neg) = (self.node(pos), self.node(neg));
        self.add(Box::new(CurrentSource::new(name, pos, neg, waveform)))
    }

    pub fn diode(&mut self, name: &str, anode: &str, cathode: &str, model: DiodeModel) -> &mut Self {
        let (a, c) = (self.node(anode), self.node(cathode));
        let store = self.num_stores;
        self.num_stores += 1;
        self.add(Box::new(Diode::new(name, a, c, model, store)))
    }

    pub fn vcvs(&mut self, name: &str, out: (&str, &str), ctrl: (&str, &str), gain: f64) -> &mut Self {
        let out = (self.node(out.0), self.node(out.1));
        let ctrl = (self.node(ctrl.0), self.node(ctrl.1));
        let branch = self.next_branch(name);
        self.add(Box::new(Vcvs::new(name, out, ctrl, gain, branch)))
    }

    pub fn vccs(&mut self, name: &str, out: (&str, &str), ctrl: (&str, &str), gm: f64) -> &mut Self {
        let out = (self.node(out.0), self.node(out.1));
        let ctrl = (self.node(ctrl.0), self.node(ctrl.1));
        self.add(Box::new(Vccs::new(name, out, ctrl, gm)))
    }

    /// Initial guess for a node's voltage (`.NODESET`).
    pub fn nodeset(&mut self, node: &str, value: f64) -> &mut Self {
        if let Some(i) = self.node(node) {
            self.nodesets.insert(i, value);
        }
        self
    }

    /// Structural checks: unique names, finite values, no dangling nodes.
    pub fn check(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::EmptyCircuit);
        }
        let mut seen = HashSet::new();
        for d in &self.devices {
            if !seen.insert(d.name().to_uppercase()) {
                return Err(Error::DuplicateName(d.name().to_string()));
            }
            if !d.value().is_finite() {
                return Err(Error::InvalidValue {
                    name: d.name().to_string(),
                    value: d.value(),
                });
            }
        }

        let mut connections = vec![0usize; self.nodes.len()];
        for d in &self.devices {
            for i in d.nodes().into_iter().flatten() {
                connections[i] += 1;
            }
        }
        if let Some((name, _)) = self
            .nodes
            .iter()
            .find(|(_, i)| connections[**i] < 2)
        {
            return Err(Error::DanglingNode(name.clone()));
        }
        Ok(())
    }

    fn solution_size(&self) -> usize {
        self.nodes.len() + self.num_branches
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Box<dyn Device>> {
        self.devices
            .iter_mut()
            .find(|d| d.name().eq_ignore_ascii_case(name))
    }
}

impl Loader for Circuit {
    fn sizes(&self) -> SystemSizes {
        SystemSizes::new(self.solution_size(), 0, self.num_stores)
    }

    fn update_state(&mut self, vecs: &mut LoadVectors<'_>, state: &SolverState) -> CoreResult<()> {
        let layout = self.layout();
        for d in &self.devices {
            d.update_state(layout, vecs, state);
        }
        Ok(())
    }

    fn load_dae_vectors(
        &mut self,
        vecs: &mut LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeVectors,
    ) -> CoreResult<()> {
        let layout = self.layout();
        for d in &self.devices {
            d.load_vectors(layout, vecs, state, out);
        }
        Ok(())
    }

    fn load_dae_matrices(
        &mut self,
        vecs: &LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeMatrices,
    ) -> CoreResult<()> {
        let layout = self.layout();
        for d in &self.devices {
            d.load_matrices(layout, vecs, state, out);
        }
        Ok(())
    }

    fn breakpoints(&self, start: f64, end: f64) -> Vec<f64> {
        let mut out = Vec::new();
        for d in &self.devices {
            d.breakpoints(start, end, &mut out);
        }
        out.sort_by(f64::total_cmp);
        out.dedup();
        out
    }

    fn variable_kinds(&self) -> Vec<VariableKind> {
        let mut kinds = vec![VariableKind::Voltage; self.nodes.len()];
        kinds.resize(self.solution_size(), VariableKind::Current);
        kinds
    }

    fn limiter_enabled(&self) -> bool {
        self.devices.iter().any(|d| d.limits())
    }

    fn set_initial_guess(&mut self, solution: &mut DVector<f64>) {
        solution.fill(0.0);
        for (&i, &v) in &self.nodesets {
            solution[i] = v;
        }
    }

    fn set_param(&mut self, name: &str, value: f64) -> CoreResult<()> {
        match self.find_mut(name) {
            Some(d) => {
                log::debug!("{} = {:e}", d.name(), value);
                d.set_value(value);
                Ok(())
            }
            None => Err(CoreError::UnknownParameter(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Vectors {
        x: DVector<f64>,
        empty: DVector<f64>,
        next_state: DVector<f64>,
        next_store: DVector<f64>,
        curr_store: DVector<f64>,
        lead: DVector<f64>,
    }

    impl Vectors {
        fn new(x: Vec<f64>, stores: usize) -> Self {
            Self {
                x: DVector::from_vec(x),
                empty: DVector::zeros(0),
                next_state: DVector::zeros(0),
                next_store: DVector::zeros(stores),
                curr_store: DVector::zeros(stores),
                lead: DVector::zeros(stores),
            }
        }

        fn view(&mut self) -> LoadVectors<'_> {
            LoadVectors {
                next_solution: &self.x,
                curr_solution: &self.x,
                last_solution: &self.x,
                next_state: &mut self.next_state,
                curr_state: &self.empty,
                last_state: &self.empty,
                next_state_deriv: &self.empty,
                next_store: &mut self.next_store,
                curr_store: &self.curr_store,
                last_store: &self.curr_store,
                next_store_lead_curr_q: &mut self.lead,
            }
        }
    }

    fn divider() -> Circuit {
        let mut ckt = Circuit::new();
        ckt.voltage_source("V1", "in", "0", Waveform::dc(10.0))
            .resistor("R1", "in", "out", 1e3)
            .resistor("R2", "out", "0", 1e3);
        ckt
    }

    #[test]
    fn divider_residual_vanishes_at_solution() {
        let mut ckt = divider();
        assert_eq!(ckt.sizes(), SystemSizes::new(3, 0, 0));
        let br = ckt.branch_index("v1").unwrap();
        assert_eq!(br, 2);

        // v(in) = 10, v(out) = 5, source current = -5 mA
        let mut v = Vectors::new(vec![10.0, 5.0, -5e-3], 0);
        let state = SolverState::new();
        let mut out = DaeVectors::new(3);
        ckt.load_dae_vectors(&mut v.view(), &state, &mut out).unwrap();
        assert!(out.f.norm() < 1e-12, "{}", out.f);

        let mut mats = DaeMatrices::new(3);
        ckt.load_dae_matrices(&v.view(), &state, &mut mats).unwrap();
        assert_eq!(mats.dfdx.get(1, 1), 2e-3);
        assert_eq!(mats.dfdx.get(0, br), 1.0);
        assert_eq!(mats.dfdx.get(br, 0), 1.0);
    }

    #[test]
    fn kinds_follow_layout() {
        let ckt = divider();
        assert_eq!(
            ckt.variable_kinds(),
            vec![VariableKind::Voltage, VariableKind::Voltage, VariableKind::Current]
        );
        assert!(!ckt.limiter_enabled());
    }

    #[test]
    fn structural_checks() {
        assert!(divider().check().is_ok());
        assert!(matches!(Circuit::new().check(), Err(Error::EmptyCircuit)));

        let mut dup = divider();
        dup.resistor("r1", "out", "0", 1.0);
        assert!(matches!(dup.check(), Err(Error::DuplicateName(_))));

        let mut dangling = divider();
        dangling.resistor("R3", "out", "nowhere", 1.0);
        assert!(matches!(dangling.check(), Err(Error::DanglingNode(n)) if n == "nowhere"));
    }

    #[test]
    fn set_param_by_name() {
        let mut ckt = divider();
        ckt.set_param("r2", 3e3).unwrap();
        assert_eq!(ckt.devices()[2].value(), 3e3);
        ckt.set_param("V1", 5.0).unwrap();
        assert_eq!(ckt.devices()[0].value(), 5.0);
        assert!(matches!(
            ckt.set_param("R9", 1.0),
            Err(CoreError::UnknownParameter(_))
        ));
    }

    #[test]
    fn breakpoints_are_merged() {
        let mut ckt = Circuit::new();
        ckt.voltage_source("V1", "a", "0", Waveform::pulse(0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0))
            .current_source("I1", "a", "0", Waveform::pulse(0.0, 1.0, 1.0, 0.5, 0.5, 1.0, 0.0))
            .resistor("R1", "a", "0", 1.0);
        assert_eq!(ckt.breakpoints(0.0, 10.0), vec![1.0, 1.5, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn diode_limits_through_store() {
        let mut ckt = Circuit::new();
        ckt.current_source("I1", "0", "a", Waveform::dc(1e-3))
            .diode("D1", "a", "0", DiodeModel::default());
        assert_eq!(ckt.sizes(), SystemSizes::new(1, 0, 1));
        assert!(ckt.limiter_enabled());

        let mut v = Vectors::new(vec![5.0], 1);
        let mut state = SolverState::new();
        state.newton_iter = 1;
        v.next_store[0] = 0.6;
        ckt.update_state(&mut v.view(), &state).unwrap();
        let vd = v.next_store[0];
        assert!(vd > 0.6 && vd < 0.8, "limited to {}", vd);

        let mut out = DaeVectors::new(1);
        ckt.load_dae_vectors(&mut v.view(), &state, &mut out).unwrap();
        // the correction points back toward the trial voltage
        assert!(out.dfdx_dvp[0] < 0.0);
    }

    #[test]
    fn nodesets_seed_the_guess() {
        let mut ckt = divider();
        ckt.nodeset("out", 4.0);
        let mut x = DVector::from_element(3, 7.0);
        ckt.set_initial_guess(&mut x);
        assert_eq!(x.as_slice(), &[0.0, 4.0, 0.0]);
    }
}
