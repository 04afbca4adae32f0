//! Preconditioners for iterative solvers.
//!
//! A preconditioner M approximates A so that A·M⁻¹ has better spectral
//! properties than A. GMRES here is right-preconditioned, which leaves the
//! true residual norm `||b - Ax||` unchanged.

use nalgebra::DVector;
use spicier_core::DaeMatrix;

/// Apply an approximate inverse: y = M⁻¹ x.
pub trait Preconditioner {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>);

    fn dim(&self) -> usize;
}

/// Jacobi (diagonal) preconditioner.
///
/// Circuit Jacobians are usually diagonally dominant on node rows. Rows with
/// a (near) zero diagonal, such as voltage-source branch rows, are left
/// unscaled.
pub struct JacobiPreconditioner {
    inv_diag: DVector<f64>,
}

impl JacobiPreconditioner {
    pub fn from_matrix(m: &DaeMatrix) -> Self {
        Self::from_diagonal(&m.diagonal())
    }

    pub fn from_diagonal(diag: &[f64]) -> Self {
        let inv_diag = DVector::from_iterator(
            diag.len(),
            diag.iter()
                .map(|&d| if d.abs() < 1e-30 { 1.0 } else { 1.0 / d }),
        );
        Self { inv_diag }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.copy_from(&x.component_mul(&self.inv_diag));
    }

    fn dim(&self) -> usize {
        self.inv_diag.len()
    }
}

/// No preconditioning.
pub struct IdentityPreconditioner {
    size: usize,
}

impl IdentityPreconditioner {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.copy_from(x);
    }

    fn dim(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn jacobi_divides_by_summed_diagonal() {
        let mut m = DaeMatrix::new(3);
        m.add(0, 0, 1.0);
        m.add(0, 0, 1.0);
        m.add(1, 1, 4.0);
        m.add(2, 2, 5.0);
        m.add(0, 1, 7.0);
        let precond = JacobiPreconditioner::from_matrix(&m);

        let mut y = DVector::zeros(3);
        precond.apply(&dvector![2.0, 8.0, 10.0], &mut y);
        assert!((y[0] - 1.0).abs() < 1e-15);
        assert!((y[1] - 2.0).abs() < 1e-15);
        assert!((y[2] - 2.0).abs() < 1e-15);
    }

    #[test]
    fn jacobi_skips_zero_diagonal() {
        let precond = JacobiPreconditioner::from_diagonal(&[0.0, 2.0]);
        let mut y = DVector::zeros(2);
        precond.apply(&dvector![3.0, 4.0], &mut y);
        assert_eq!(y, dvector![3.0, 2.0]);
    }

    #[test]
    fn identity_is_a_copy() {
        let precond = IdentityPreconditioner::new(2);
        let mut y = DVector::zeros(2);
        precond.apply(&dvector![1.5, -2.0], &mut y);
        assert_eq!(y, dvector![1.5, -2.0]);
        assert_eq!(precond.dim(), 2);
    }
}
