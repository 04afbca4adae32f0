//! Linear operator abstraction for matrix-free iterative solvers.
//!
//! GMRES only needs `y = A * x`. Anything that can supply that product, an
//! assembled [`DaeMatrix`], a compressed faer matrix or a closure over the
//! assembler's matrix-free Jacobian, can drive it.

use nalgebra::DVector;
use spicier_core::DaeMatrix;

/// A linear operator that computes y = A * x.
pub trait LinearOperator {
    /// Dimension of the (square) operator.
    fn dim(&self) -> usize;

    /// Apply the operator: y = A * x.
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>);
}

impl LinearOperator for DaeMatrix {
    fn dim(&self) -> usize {
        self.size()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.fill(0.0);
        for &(r, c, v) in self.triplets() {
            y[r] += v * x[c];
        }
    }
}

/// Operator backed by a closure, used for matrix-free Jacobian products.
pub struct FnOperator<F> {
    dim: usize,
    f: F,
}

impl<F> FnOperator<F>
where
    F: Fn(&DVector<f64>, &mut DVector<f64>),
{
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> LinearOperator for FnOperator<F>
where
    F: Fn(&DVector<f64>, &mut DVector<f64>),
{
    fn dim(&self) -> usize {
        self.dim
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        (self.f)(x, y)
    }
}
