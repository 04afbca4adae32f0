//! Linear system solvers.
//!
//! The Newton solver talks to these through [`LinearSolver`]: factor a
//! Jacobian once, then solve one or more right-hand sides against it. Keeping
//! the factorization lets modified Newton reuse a stale Jacobian.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use spicier_core::DaeMatrix;

use crate::error::{Error, Result};

/// Systems with this many or more variables use the sparse solver path.
pub const SPARSE_THRESHOLD: usize = 50;

/// Diagnostics from one linear solve.
#[derive(Debug, Clone)]
pub struct LinearSolveReport {
    /// Solution vector.
    pub solution: DVector<f64>,
    /// Iterations used (1 for direct solvers).
    pub iterations: usize,
    /// Relative residual `||b - Ax|| / ||b||` when known, 0 for direct solvers.
    pub residual: f64,
}

/// A "solve Ax = b" capability.
pub trait LinearSolver {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Factor (or otherwise prepare) the matrix for subsequent solves.
    fn factor(&mut self, matrix: &DaeMatrix) -> Result<()>;

    /// Solve against the last factored matrix.
    ///
    /// `tol` is the relative residual requested by inexact Newton; direct
    /// solvers ignore it.
    fn solve(&mut self, rhs: &DVector<f64>, tol: f64) -> Result<LinearSolveReport>;

    /// Whether a factorization is available for reuse.
    fn is_factored(&self) -> bool;
}

/// Solve a linear system Ax = b using LU decomposition.
pub fn solve_dense(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    if a.nrows() != a.ncols() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    if a.nrows() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: b.len(),
        });
    }

    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

/// Solve a sparse linear system Ax = b using sparse LU decomposition.
///
/// The matrix is constructed from triplets `(row, col, value)`. Duplicate entries
/// at the same position are summed automatically by faer.
pub fn solve_sparse(
    size: usize,
    triplets: &[(usize, usize, f64)],
    rhs: &DVector<f64>,
) -> Result<DVector<f64>> {
    if size != rhs.len() {
        return Err(Error::DimensionMismatch {
            expected: size,
            actual: rhs.len(),
        });
    }

    let mut solver = SparseLu::new();
    solver.factor_triplets(size, triplets)?;
    Ok(solver.solve(rhs, 0.0)?.solution)
}

/// Dense LU through nalgebra, cached between solves.
#[derive(Default)]
pub struct DenseLu {
    size: usize,
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl DenseLu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolver for DenseLu {
    fn name(&self) -> &'static str {
        "dense LU"
    }

    fn factor(&mut self, matrix: &DaeMatrix) -> Result<()> {
        let lu = matrix.to_dense().lu();
        if !lu.is_invertible() {
            self.lu = None;
            return Err(Error::SingularMatrix);
        }
        self.size = matrix.size();
        self.lu = Some(lu);
        Ok(())
    }

    fn solve(&mut self, rhs: &DVector<f64>, _tol: f64) -> Result<LinearSolveReport> {
        let lu = self
            .lu
            .as_ref()
            .ok_or_else(|| Error::SolverError("dense LU used before factorization".into()))?;
        if self.size != rhs.len() {
            return Err(Error::DimensionMismatch {
                expected: self.size,
                actual: rhs.len(),
            });
        }
        let solution = lu.solve(rhs).ok_or(Error::SingularMatrix)?;
        Ok(LinearSolveReport {
            solution,
            iterations: 1,
            residual: 0.0,
        })
    }

    fn is_factored(&self) -> bool {
        self.lu.is_some()
    }
}

type SparseSolveFn = Box<dyn Fn(&DVector<f64>) -> DVector<f64>>;

/// Sparse LU through faer, cached between solves.
#[derive(Default)]
pub struct SparseLu {
    size: usize,
    solve_fn: Option<SparseSolveFn>,
}

impl SparseLu {
    pub fn new() -> Self {
        Self::default()
    }

    fn factor_triplets(&mut self, size: usize, triplets: &[(usize, usize, f64)]) -> Result<()> {
        self.solve_fn = None;

        // Convert triplets to faer format
        let faer_triplets: Vec<_> = triplets
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, v))
            .collect();

        let sparse_mat =
            SparseColMat::<usize, f64>::try_new_from_triplets(size, size, &faer_triplets)
                .map_err(|_| Error::SingularMatrix)?;

        let lu = sparse_mat.sp_lu().map_err(|_| Error::SingularMatrix)?;

        self.size = size;
        self.solve_fn = Some(Box::new(move |rhs: &DVector<f64>| {
            let faer_rhs = Col::<f64>::from_fn(size, |i| rhs[i]);
            let faer_x = lu.solve(&faer_rhs);
            DVector::from_fn(size, |i, _| faer_x[i])
        }));
        Ok(())
    }
}

impl LinearSolver for SparseLu {
    fn name(&self) -> &'static str {
        "sparse LU"
    }

    fn factor(&mut self, matrix: &DaeMatrix) -> Result<()> {
        self.factor_triplets(matrix.size(), matrix.triplets())
    }

    fn solve(&mut self, rhs: &DVector<f64>, _tol: f64) -> Result<LinearSolveReport> {
        if rhs.len() != self.size {
            return Err(Error::DimensionMismatch {
                expected: self.size,
                actual: rhs.len(),
            });
        }
        let solve_fn = self
            .solve_fn
            .as_ref()
            .ok_or_else(|| Error::SolverError("sparse LU used before factorization".into()))?;
        let solution = solve_fn(rhs);
        // faer does not report singular pivots through solve
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(Error::SingularMatrix);
        }
        Ok(LinearSolveReport {
            solution,
            iterations: 1,
            residual: 0.0,
        })
    }

    fn is_factored(&self) -> bool {
        self.solve_fn.is_some()
    }
}
