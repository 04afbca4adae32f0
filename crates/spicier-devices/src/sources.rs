//! Independent sources and the voltage-controlled sources.

use spicier_core::{DaeMatrices, DaeVectors, LoadVectors, SolverState};

use crate::device::Device;
use crate::stamp::{Layout, add_entry, add_pair, add_transconductance, voltage};
use crate::waveforms::Waveform;

/// Independent voltage source; its current is a branch unknown.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pub pos: Option<usize>,
    pub neg: Option<usize>,
    pub waveform: Waveform,
    pub branch: usize,
}

impl VoltageSource {
    pub fn new(
        name: impl Into<String>,
        pos: Option<usize>,
        neg: Option<usize>,
        waveform: Waveform,
        branch: usize,
    ) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            waveform,
            branch,
        }
    }
}

impl Device for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.pos, self.neg]
    }

    fn branch_count(&self) -> usize {
        1
    }

    fn load_vectors(
        &self,
        layout: Layout,
        vecs: &LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeVectors,
    ) {
        let br = layout.branch(self.branch);
        let x = vecs.next_solution;
        add_pair(&mut out.f, self.pos, self.neg, x[br]);
        out.f[br] += voltage(x, self.pos, self.neg) - self.waveform.value_at(state.current_time);
    }

    fn load_matrices(
        &self,
        layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        let br = Some(layout.branch(self.branch));
        add_entry(&mut out.dfdx, self.pos, br, 1.0);
        add_entry(&mut out.dfdx, self.neg, br, -1.0);
        add_entry(&mut out.dfdx, br, self.pos, 1.0);
        add_entry(&mut out.dfdx, br, self.neg, -1.0);
    }

    fn breakpoints(&self, start: f64, end: f64, out: &mut Vec<f64>) {
        self.waveform.breakpoints(start, end, out);
    }

    fn value(&self) -> f64 {
        self.waveform.level()
    }

    fn set_value(&mut self, value: f64) {
        self.waveform.set_level(value);
    }
}

/// Independent current source; positive current flows from `pos` through
/// the source into `neg`.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub pos: Option<usize>,
    pub neg: Option<usize>,
    pub waveform: Waveform,
}

impl CurrentSource {
    pub fn new(name: impl Into<String>, pos: Option<usize>, neg: Option<usize>, waveform: Waveform) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            waveform,
        }
    }
}

impl Device for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.pos, self.neg]
    }

    fn load_vectors(
        &self,
        _layout: Layout,
        _vecs: &LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeVectors,
    ) {
        add_pair(&mut out.f, self.pos, self.neg, self.waveform.value_at(state.current_time));
    }

    fn load_matrices(
        &self,
        _layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        _out: &mut DaeMatrices,
    ) {
    }

    fn breakpoints(&self, start: f64, end: f64, out: &mut Vec<f64>) {
        self.waveform.breakpoints(start, end, out);
    }

    fn value(&self) -> f64 {
        self.waveform.level()
    }

    fn set_value(&mut self, value: f64) {
        self.waveform.set_level(value);
    }
}

// ────────────────────── VCVS (E element) ──────────────────────

/// Voltage-controlled voltage source.
///
/// V(out+, out-) = gain * V(ctrl+, ctrl-), with one branch current.
#[derive(Debug, Clone)]
pub struct Vcvs {
    pub name: String,
    pub out_pos: Option<usize>,
    pub out_neg: Option<usize>,
    pub ctrl_pos: Option<usize>,
    pub ctrl_neg: Option<usize>,
    pub gain: f64,
    pub branch: usize,
}

impl Vcvs {
    pub fn new(
        name: impl Into<String>,
        out: (Option<usize>, Option<usize>),
        ctrl: (Option<usize>, Option<usize>),
        gain: f64,
        branch: usize,
    ) -> Self {
        Self {
            name: name.into(),
            out_pos: out.0,
            out_neg: out.1,
            ctrl_pos: ctrl.0,
            ctrl_neg: ctrl.1,
            gain,
            branch,
        }
    }
}

impl Device for Vcvs {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.out_pos, self.out_neg, self.ctrl_pos, self.ctrl_neg]
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
        add_pair(&mut out.f, self.out_pos, self.out_neg, x[br]);
        // branch row: V(out) - gain * V(ctrl) = 0
        out.f[br] += voltage(x, self.out_pos, self.out_neg)
            - self.gain * voltage(x, self.ctrl_pos, self.ctrl_neg);
    }

    fn load_matrices(
        &self,
        layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        let br = Some(layout.branch(self.branch));
        let m = &mut out.dfdx;
        add_entry(m, self.out_pos, br, 1.0);
        add_entry(m, self.out_neg, br, -1.0);
        add_entry(m, br, self.out_pos, 1.0);
        add_entry(m, br, self.out_neg, -1.0);
        add_entry(m, br, self.ctrl_pos, -self.gain);
        add_entry(m, br, self.ctrl_neg, self.gain);
    }

    fn value(&self) -> f64 {
        self.gain
    }

    fn set_value(&mut self, value: f64) {
        self.gain = value;
    }
}

// ────────────────────── VCCS (G element) ──────────────────────

/// Voltage-controlled current source.
///
/// I(out+→out-) = gm * V(ctrl+, ctrl-); no branch unknown.
#[derive(Debug, Clone)]
pub struct Vccs {
    pub name: String,
    pub out_pos: Option<usize>,
    pub out_neg: Option<usize>,
    pub ctrl_pos: Option<usize>,
    pub ctrl_neg: Option<usize>,
    pub gm: f64,
}

impl Vccs {
    pub fn new(
        name: impl Into<String>,
        out: (Option<usize>, Option<usize>),
        ctrl: (Option<usize>, Option<usize>),
        gm: f64,
    ) -> Self {
        Self {
            name: name.into(),
            out_pos: out.0,
            out_neg: out.1,
            ctrl_pos: ctrl.0,
            ctrl_neg: ctrl.1,
            gm,
        }
    }
}

impl Device for Vccs {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.out_pos, self.out_neg, self.ctrl_pos, self.ctrl_neg]
    }

    fn load_vectors(
        &self,
        _layout: Layout,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) {
        let i = self.gm * voltage(vecs.next_solution, self.ctrl_pos, self.ctrl_neg);
        add_pair(&mut out.f, self.out_pos, self.out_neg, i);
    }

    fn load_matrices(
        &self,
        _layout: Layout,
        _vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        add_transconductance(
            &mut out.dfdx,
            self.out_pos,
            self.out_neg,
            self.ctrl_pos,
            self.ctrl_neg,
            self.gm,
        );
    }

    fn value(&self) -> f64 {
        self.gm
    }

    fn set_value(&mut self, value: f64) {
        self.gm = value;
    }
}
