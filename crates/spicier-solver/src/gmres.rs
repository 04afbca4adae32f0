//! Restarted GMRES with right preconditioning.
//!
//! Used as the inexact linear solver inside Newton: the requested relative
//! residual comes from the Newton forcing term, so early iterations are
//! solved loosely and later ones tightly.

use nalgebra::{DMatrix, DVector};
use spicier_core::DaeMatrix;

use crate::error::{Error, Result};
use crate::linear::{LinearSolveReport, LinearSolver};
use crate::operator::LinearOperator;
use crate::preconditioner::{JacobiPreconditioner, Preconditioner};
use crate::sparse_operator::CscOperator;

/// GMRES solver configuration.
#[derive(Debug, Clone)]
pub struct GmresConfig {
    /// Maximum total Arnoldi iterations across restarts.
    pub max_iter: usize,
    /// Relative residual target used when the caller passes no tolerance.
    pub tol: f64,
    /// Krylov subspace dimension before restart.
    pub restart: usize,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-8,
            restart: 30,
        }
    }
}

impl GmresConfig {
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_restart(mut self, restart: usize) -> Self {
        self.restart = restart.max(1);
        self
    }
}

/// Result of a GMRES solve.
#[derive(Debug, Clone)]
pub struct GmresResult {
    pub x: DVector<f64>,
    pub iterations: usize,
    /// Final relative residual `||b - Ax|| / ||b||`.
    pub residual: f64,
    pub converged: bool,
}

/// Givens rotation `(c, s)` zeroing `b` in `[a, b]`.
fn givens(a: f64, b: f64) -> (f64, f64) {
    if b.abs() < 1e-30 {
        return (1.0, 0.0);
    }
    let r = a.hypot(b);
    (a / r, b / r)
}

/// Solve A·x = b starting from x = 0.
pub fn solve_gmres(
    op: &dyn LinearOperator,
    precond: &dyn Preconditioner,
    b: &DVector<f64>,
    config: &GmresConfig,
) -> GmresResult {
    let n = op.dim();
    debug_assert_eq!(b.len(), n);
    debug_assert_eq!(precond.dim(), n);

    let b_norm = b.norm();
    if b_norm < 1e-30 {
        return GmresResult {
            x: DVector::zeros(n),
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    let m = config.restart.min(n).max(1);
    let mut x = DVector::zeros(n);
    let mut work = DVector::zeros(n);
    let mut total_iter = 0;

    while total_iter < config.max_iter {
        op.apply(&x, &mut work);
        let r = b - &work;
        let beta = r.norm();
        let rel_res = beta / b_norm;
        if rel_res < config.tol {
            return GmresResult {
                x,
                iterations: total_iter,
                residual: rel_res,
                converged: true,
            };
        }

        // Arnoldi basis V, preconditioned directions Z, Hessenberg H
        let mut basis: Vec<DVector<f64>> = Vec::with_capacity(m + 1);
        let mut dirs: Vec<DVector<f64>> = Vec::with_capacity(m);
        let mut h = DMatrix::<f64>::zeros(m + 1, m);
        let mut g = DVector::<f64>::zeros(m + 1);
        let mut rotations: Vec<(f64, f64)> = Vec::with_capacity(m);
        basis.push(r / beta);
        g[0] = beta;

        let mut k = 0;
        while k < m && total_iter < config.max_iter {
            total_iter += 1;

            let mut z = DVector::zeros(n);
            precond.apply(&basis[k], &mut z);
            op.apply(&z, &mut work);
            dirs.push(z);

            let mut w = work.clone();
            for (j, vj) in basis.iter().enumerate() {
                let hjk = vj.dot(&w);
                h[(j, k)] = hjk;
                w.axpy(-hjk, vj, 1.0);
            }
            let w_norm = w.norm();
            h[(k + 1, k)] = w_norm;

            for (j, &(c, s)) in rotations.iter().enumerate() {
                let upper = c * h[(j, k)] + s * h[(j + 1, k)];
                h[(j + 1, k)] = -s * h[(j, k)] + c * h[(j + 1, k)];
                h[(j, k)] = upper;
            }
            let (c, s) = givens(h[(k, k)], h[(k + 1, k)]);
            h[(k, k)] = c * h[(k, k)] + s * h[(k + 1, k)];
            h[(k + 1, k)] = 0.0;
            rotations.push((c, s));
            g[k + 1] = -s * g[k];
            g[k] *= c;

            k += 1;
            if g[k].abs() / b_norm < config.tol || w_norm < 1e-30 {
                break;
            }
            basis.push(w / w_norm);
        }

        // Back substitution on the triangularized H
        let mut y = DVector::<f64>::zeros(k);
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[(i, j)] * y[j];
            }
            if h[(i, i)].abs() > 1e-30 {
                y[i] = sum / h[(i, i)];
            }
        }
        for (yi, zi) in y.iter().zip(&dirs) {
            x.axpy(*yi, zi, 1.0);
        }
    }

    op.apply(&x, &mut work);
    let rel_res = (b - &work).norm() / b_norm;
    GmresResult {
        x,
        iterations: total_iter,
        residual: rel_res,
        converged: rel_res < config.tol,
    }
}

/// GMRES behind the [`LinearSolver`] interface.
///
/// `factor` compresses the Jacobian and builds a Jacobi preconditioner;
/// `solve` honours the caller's tolerance (the Newton forcing term) when it
/// is positive.
pub struct GmresSolver {
    config: GmresConfig,
    op: Option<CscOperator>,
    precond: Option<JacobiPreconditioner>,
}

impl GmresSolver {
    pub fn new(config: GmresConfig) -> Self {
        Self {
            config,
            op: None,
            precond: None,
        }
    }
}

impl LinearSolver for GmresSolver {
    fn name(&self) -> &'static str {
        "GMRES"
    }

    fn factor(&mut self, matrix: &DaeMatrix) -> Result<()> {
        self.op = Some(CscOperator::from_dae_matrix(matrix)?);
        self.precond = Some(JacobiPreconditioner::from_matrix(matrix));
        Ok(())
    }

    fn solve(&mut self, rhs: &DVector<f64>, tol: f64) -> Result<LinearSolveReport> {
        let (Some(op), Some(precond)) = (self.op.as_ref(), self.precond.as_ref()) else {
            return Err(Error::SolverError("GMRES used before factorization".into()));
        };
        if rhs.len() != op.dim() {
            return Err(Error::DimensionMismatch {
                expected: op.dim(),
                actual: rhs.len(),
            });
        }

        let mut config = self.config.clone();
        if tol > 0.0 {
            config.tol = tol;
        }
        let result = solve_gmres(op, precond, rhs, &config);
        if !result.converged {
            log::warn!(
                "GMRES did not converge: {} iterations, relative residual {:.3e} (target {:.3e})",
                result.iterations,
                result.residual,
                config.tol
            );
            return Err(Error::ConvergenceFailed {
                iterations: result.iterations,
            });
        }

        Ok(LinearSolveReport {
            solution: result.x,
            iterations: result.iterations,
            residual: result.residual,
        })
    }

    fn is_factored(&self) -> bool {
        self.op.is_some()
    }
}
