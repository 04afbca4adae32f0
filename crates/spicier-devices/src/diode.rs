//! Junction diode with SPICE-style voltage limiting.

use spicier_core::{DaeMatrices, DaeVectors, LoadVectors, SolverState};

use crate::device::Device;
use crate::stamp::{Layout, add_conductance, add_pair, voltage};

/// Thermal voltage at 300.15 K.
pub const VT_NOMINAL: f64 = 0.025_864;

/// Minimum conductance across every junction.
pub const GMIN: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct DiodeModel {
    /// Saturation current.
    pub is: f64,
    /// Emission coefficient.
    pub n: f64,
    /// Constant junction capacitance.
    pub cj0: f64,
}

impl Default for DiodeModel {
    fn default() -> Self {
        Self {
            is: 1.0e-14,
            n: 1.0,
            cj0: 0.0,
        }
    }
}

impl DiodeModel {
    pub fn vt(&self) -> f64 {
        self.n * VT_NOMINAL
    }

    /// Voltage above which the exponential is limited per iteration.
    pub fn vcrit(&self) -> f64 {
        let vt = self.vt();
        vt * (vt / (std::f64::consts::SQRT_2 * self.is)).ln()
    }

    /// Current and small-signal conductance at `vd`.
    pub fn evaluate(&self, vd: f64) -> (f64, f64) {
        let vt = self.vt();
        let e = (vd / vt).exp();
        let id = self.is * (e - 1.0) + GMIN * vd;
        let gd = self.is * e / vt + GMIN;
        (id, gd)
    }
}

/// Limit the per-iteration change of a junction voltage.
///
/// Returns the limited voltage and whether limiting was applied.
pub fn pnjlim(vnew: f64, vold: f64, vt: f64, vcrit: f64) -> (f64, bool) {
    if vnew > vcrit && (vnew - vold).abs() > vt + vt {
        let limited = if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vt;
            if arg > 0.0 { vold + vt * arg.ln() } else { vcrit }
        } else {
            vt * (vnew / vt).ln()
        };
        (limited, true)
    } else {
        (vnew, false)
    }
}

/// Diode from anode `a` to cathode `c`.
///
/// The limited junction voltage lives in one store slot so the next Newton
/// iteration limits against it.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    pub a: Option<usize>,
    pub c: Option<usize>,
    pub model: DiodeModel,
    /// Index into the store vectors.
    pub store: usize,
    pub limiting: bool,
}

impl Diode {
    pub fn new(
        name: impl Into<String>,
        a: Option<usize>,
        c: Option<usize>,
        model: DiodeModel,
        store: usize,
    ) -> Self {
        Self {
            name: name.into(),
            a,
            c,
            model,
            store,
            limiting: true,
        }
    }

    fn junction_voltage(&self, vecs: &LoadVectors<'_>) -> f64 {
        if self.limiting {
            vecs.next_store[self.store]
        } else {
            voltage(vecs.next_solution, self.a, self.c)
        }
    }
}

impl Device for Diode {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> Vec<Option<usize>> {
        vec![self.a, self.c]
    }

    fn store_count(&self) -> usize {
        1
    }

    fn limits(&self) -> bool {
        self.limiting
    }

    fn update_state(&self, _layout: Layout, vecs: &mut LoadVectors<'_>, state: &SolverState) {
        let vnew = voltage(vecs.next_solution, self.a, self.c);
        if !self.limiting {
            vecs.next_store[self.store] = vnew;
            return;
        }
        let vold = if state.newton_iter == 0 {
            vecs.curr_store[self.store]
        } else {
            vecs.next_store[self.store]
        };
        let (vd, limited) = pnjlim(vnew, vold, self.model.vt(), self.model.vcrit());
        if limited {
            log::trace!("{}: limited {:.4} -> {:.4}", self.name, vnew, vd);
        }
        vecs.next_store[self.store] = vd;
    }

    fn load_vectors(
        &self,
        _layout: Layout,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeVectors,
    ) {
        let vd = self.junction_voltage(vecs);
        let (id, gd) = self.model.evaluate(vd);
        add_pair(&mut out.f, self.a, self.c, id);
        add_pair(&mut out.q, self.a, self.c, self.model.cj0 * vd);

        if self.limiting {
            // distance from the trial voltage to the limited one
            let dvp = vd - voltage(vecs.next_solution, self.a, self.c);
            add_pair(&mut out.dfdx_dvp, self.a, self.c, gd * dvp);
            add_pair(&mut out.dqdx_dvp, self.a, self.c, self.model.cj0 * dvp);
        }
    }

    fn load_matrices(
        &self,
        _layout: Layout,
        vecs: &LoadVectors<'_>,
        _state: &SolverState,
        out: &mut DaeMatrices,
    ) {
        let (_, gd) = self.model.evaluate(self.junction_voltage(vecs));
        add_conductance(&mut out.dfdx, self.a, self.c, gd);
        if self.model.cj0 != 0.0 {
            add_conductance(&mut out.dqdx, self.a, self.c, self.model.cj0);
        }
    }

    fn value(&self) -> f64 {
        self.model.is
    }

    fn set_value(&mut self, value: f64) {
        self.model.is = value;
    }
}
