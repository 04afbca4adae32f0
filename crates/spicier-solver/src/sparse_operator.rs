//! Compressed sparse operator for iterative solvers.
//!
//! [`DaeMatrix`] keeps raw triplets so device stamps can accumulate cheaply.
//! GMRES applies the same matrix dozens of times per solve, so the triplets
//! are compressed once into a faer CSC matrix with duplicates summed.

use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DVector;
use spicier_core::DaeMatrix;

use crate::error::{Error, Result};
use crate::operator::LinearOperator;

/// Sparse real-valued operator in compressed-column form.
pub struct CscOperator {
    matrix: SparseColMat<usize, f64>,
}

impl CscOperator {
    /// Compress an assembled matrix.
    pub fn from_dae_matrix(m: &DaeMatrix) -> Result<Self> {
        let faer_triplets: Vec<_> = m
            .triplets()
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, v))
            .collect();

        SparseColMat::<usize, f64>::try_new_from_triplets(m.size(), m.size(), &faer_triplets)
            .map(|matrix| Self { matrix })
            .map_err(|e| Error::SolverError(format!("sparse compression failed: {e:?}")))
    }

    /// Stored non-zeros after duplicate summation.
    pub fn nnz(&self) -> usize {
        self.matrix.as_ref().row_idx().len()
    }
}

impl LinearOperator for CscOperator {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.fill(0.0);

        let mat = self.matrix.as_ref();
        let col_ptr = mat.col_ptr();
        let row_idx = mat.row_idx();
        let values = mat.val();

        for j in 0..mat.ncols() {
            let xj = x[j];
            if xj == 0.0 {
                continue;
            }
            for idx in col_ptr[j]..col_ptr[j + 1] {
                y[row_idx[idx]] += values[idx] * xj;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn csc_matches_triplet_product() {
        let mut m = DaeMatrix::new(3);
        m.add(0, 0, 2.0);
        m.add(0, 0, 1.0);
        m.add(0, 2, -1.0);
        m.add(1, 1, 4.0);
        m.add(2, 0, 0.5);
        m.add(2, 2, 1.0);

        let op = CscOperator::from_dae_matrix(&m).unwrap();
        assert_eq!(op.nnz(), 5);

        let x = dvector![1.0, 2.0, 3.0];
        let mut y_csc = DVector::zeros(3);
        let mut y_trip = DVector::zeros(3);
        op.apply(&x, &mut y_csc);
        LinearOperator::apply(&m, &x, &mut y_trip);

        for i in 0..3 {
            assert!((y_csc[i] - y_trip[i]).abs() < 1e-14);
        }
    }
}
