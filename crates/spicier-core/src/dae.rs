//! DAE vectors and matrices.
//!
//! The circuit is written as `dQ(x)/dt + F(x) = 0`. Loaders fill the
//! [`DaeVectors`] (Q, F and the voltage-limiting corrections) and the
//! [`DaeMatrices`] (dQ/dx, dF/dx); the integration method combines them into
//! the Newton residual and Jacobian.

use nalgebra::{DMatrix, DVector};

/// Square sparse matrix stored as `(row, col, value)` triplets.
///
/// Duplicate entries at the same position are summed when the matrix is
/// converted or applied, matching how device stamps accumulate.
#[derive(Debug, Clone, Default)]
pub struct DaeMatrix {
    size: usize,
    triplets: Vec<(usize, usize, f64)>,
}

impl DaeMatrix {
    /// Create an empty `size x size` matrix.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            triplets: Vec::new(),
        }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored entries (duplicates counted separately).
    pub fn nnz(&self) -> usize {
        self.triplets.len()
    }

    /// Remove all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.triplets.clear();
    }

    /// Accumulate `value` at `(row, col)`.
    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.size && col < self.size);
        self.triplets.push((row, col, value));
    }

    /// Accumulate `value` on every diagonal entry.
    pub fn add_diagonal(&mut self, value: f64) {
        for i in 0..self.size {
            self.triplets.push((i, i, value));
        }
    }

    /// Raw triplets.
    pub fn triplets(&self) -> &[(usize, usize, f64)] {
        &self.triplets
    }

    /// Summed value at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.triplets
            .iter()
            .filter(|&&(r, c, _)| r == row && c == col)
            .map(|&(_, _, v)| v)
            .sum()
    }

    /// Summed diagonal.
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = vec![0.0; self.size];
        for &(r, c, v) in &self.triplets {
            if r == c {
                diag[r] += v;
            }
        }
        diag
    }

    /// Overwrite `self` with `a * x + b * y`.
    ///
    /// A zero coefficient drops that operand entirely.
    pub fn linear_combo(&mut self, a: f64, x: &DaeMatrix, b: f64, y: &DaeMatrix) {
        debug_assert_eq!(x.size, y.size);
        self.size = x.size;
        self.triplets.clear();
        if a != 0.0 {
            self.triplets
                .extend(x.triplets.iter().map(|&(r, c, v)| (r, c, a * v)));
        }
        if b != 0.0 {
            self.triplets
                .extend(y.triplets.iter().map(|&(r, c, v)| (r, c, b * v)));
        }
    }

    /// Compute `A * v`.
    pub fn mul_vec(&self, v: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.size);
        for &(r, c, val) in &self.triplets {
            out[r] += val * v[c];
        }
        out
    }

    /// Convert to a dense matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.size, self.size);
        for &(r, c, v) in &self.triplets {
            m[(r, c)] += v;
        }
        m
    }
}

/// DAE vectors filled by the loader on every residual evaluation.
#[derive(Debug, Clone)]
pub struct DaeVectors {
    /// Charge/flux-like quantities, differentiated in time.
    pub q: DVector<f64>,
    /// Resistive and source terms.
    pub f: DVector<f64>,
    /// `dF/dx * dVp` voltage-limiting correction.
    pub dfdx_dvp: DVector<f64>,
    /// `dQ/dx * dVp` voltage-limiting correction.
    pub dqdx_dvp: DVector<f64>,
}

impl DaeVectors {
    pub fn new(size: usize) -> Self {
        Self {
            q: DVector::zeros(size),
            f: DVector::zeros(size),
            dfdx_dvp: DVector::zeros(size),
            dqdx_dvp: DVector::zeros(size),
        }
    }

    /// Zero every vector before a fresh load.
    pub fn zero(&mut self) {
        self.q.fill(0.0);
        self.f.fill(0.0);
        self.dfdx_dvp.fill(0.0);
        self.dqdx_dvp.fill(0.0);
    }
}

/// dQ/dx and dF/dx, refilled on every Jacobian evaluation.
#[derive(Debug, Clone)]
pub struct DaeMatrices {
    pub dqdx: DaeMatrix,
    pub dfdx: DaeMatrix,
}

impl DaeMatrices {
    pub fn new(size: usize) -> Self {
        Self {
            dqdx: DaeMatrix::new(size),
            dfdx: DaeMatrix::new(size),
        }
    }

    pub fn zero(&mut self) {
        self.dqdx.clear();
        self.dfdx.clear();
    }
}
