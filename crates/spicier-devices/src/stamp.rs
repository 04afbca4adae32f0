//! Stamping helpers shared by the element loaders.
//!
//! Terminals are `Option<usize>` solution indices; `None` is ground and is
//! skipped by every helper.

use nalgebra::DVector;
use spicier_core::DaeMatrix;

/// Where the branch-current unknowns start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub num_nodes: usize,
}

impl Layout {
    /// Solution index of branch `k`.
    pub fn branch(&self, k: usize) -> usize {
        self.num_nodes + k
    }
}

/// `x[a] - x[b]`.
pub fn voltage(x: &DVector<f64>, a: Option<usize>, b: Option<usize>) -> f64 {
    a.map_or(0.0, |i| x[i]) - b.map_or(0.0, |i| x[i])
}

/// Value flowing out of `a` and into `b`.
pub fn add_pair(v: &mut DVector<f64>, a: Option<usize>, b: Option<usize>, value: f64) {
    if let Some(i) = a {
        v[i] += value;
    }
    if let Some(i) = b {
        v[i] -= value;
    }
}

pub fn add_entry(m: &mut DaeMatrix, row: Option<usize>, col: Option<usize>, value: f64) {
    if let (Some(r), Some(c)) = (row, col) {
        m.add(r, c, value);
    }
}

/// Two-terminal conductance pattern.
pub fn add_conductance(m: &mut DaeMatrix, a: Option<usize>, b: Option<usize>, g: f64) {
    add_entry(m, a, a, g);
    add_entry(m, b, b, g);
    add_entry(m, a, b, -g);
    add_entry(m, b, a, -g);
}

/// Transconductance from the `(cp, cn)` voltage into the `(op, on)` pair.
pub fn add_transconductance(
    m: &mut DaeMatrix,
    op: Option<usize>,
    on: Option<usize>,
    cp: Option<usize>,
    cn: Option<usize>,
    gm: f64,
) {
    add_entry(m, op, cp, gm);
    add_entry(m, op, cn, -gm);
    add_entry(m, on, cp, -gm);
    add_entry(m, on, cn, gm);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_terminals_are_skipped() {
        let mut m = DaeMatrix::new(2);
        add_conductance(&mut m, Some(0), None, 2.0);
        assert_eq!(m.get(0, 0), 2.0);
        assert_eq!(m.nnz(), 1);

        add_conductance(&mut m, Some(0), Some(1), 1.0);
        assert_eq!(m.get(0, 0), 3.0);
        assert_eq!(m.get(0, 1), -1.0);
        assert_eq!(m.get(1, 0), -1.0);
        assert_eq!(m.get(1, 1), 1.0);
    }

    #[test]
    fn pair_and_voltage() {
        let x = DVector::from_vec(vec![3.0, 1.0]);
        assert_eq!(voltage(&x, Some(0), Some(1)), 2.0);
        assert_eq!(voltage(&x, None, Some(1)), -1.0);

        let mut v = DVector::zeros(2);
        add_pair(&mut v, Some(1), None, 0.5);
        assert_eq!(v[1], 0.5);
        assert_eq!(v[0], 0.0);
    }
}
