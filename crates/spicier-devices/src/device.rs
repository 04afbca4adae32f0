//! The per-element loader interface a [`Circuit`](crate::Circuit) drives.

use spicier_core::{DaeMatrices, DaeVectors, LoadVectors, SolverState};

use crate::stamp::Layout;

/// One circuit element's contribution to `dQ/dt + F = 0`.
pub trait Device: std::fmt::Debug {
    fn name(&self) -> &str;

    /// Terminal node indices, `None` for ground.
    fn nodes(&self) -> Vec<Option<usize>>;

    /// Branch-current unknowns this element adds.
    fn branch_count(&self) -> usize {
        0
    }

    /// Store slots this element keeps between iterations.
    fn store_count(&self) -> usize {
        0
    }

    /// Refresh internal quantities (e.g. limited junction voltages) from
    /// the trial solution. Only `next_*` vectors are written.
    fn update_state(&self, _layout: Layout, _vecs: &mut LoadVectors<'_>, _state: &SolverState) {}

    fn load_vectors(
        &self,
        layout: Layout,
        vecs: &LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeVectors,
    );

    fn load_matrices(
        &self,
        layout: Layout,
        vecs: &LoadVectors<'_>,
        state: &SolverState,
        out: &mut DaeMatrices,
    );

    /// Discontinuities in `(start, end]`.
    fn breakpoints(&self, _start: f64, _end: f64, _out: &mut Vec<f64>) {}

    /// Whether this element reports limiting corrections.
    fn limits(&self) -> bool {
        false
    }

    /// The element's primary value (resistance, capacitance, source level).
    fn value(&self) -> f64;

    fn set_value(&mut self, value: f64);
}
