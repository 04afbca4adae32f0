//! Linear solver selection.
//!
//! Newton asks for a `Box<dyn LinearSolver>` once per analysis; which
//! implementation it gets depends on the configured kind and the system size.

use serde::{Deserialize, Serialize};

use crate::gmres::{GmresConfig, GmresSolver};
use crate::linear::{DenseLu, LinearSolver, SPARSE_THRESHOLD, SparseLu};

/// Which linear solver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearSolverKind {
    /// Dense LU for small systems, sparse LU above the threshold.
    #[default]
    Auto,
    /// Always nalgebra dense LU.
    Dense,
    /// Always faer sparse LU.
    Sparse,
    /// Always Jacobi-preconditioned GMRES.
    Gmres,
}

impl LinearSolverKind {
    /// Parse from a string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "dense" | "lu" | "denselu" => Some(Self::Dense),
            "sparse" | "klu" | "sparselu" => Some(Self::Sparse),
            "gmres" | "iterative" => Some(Self::Gmres),
            _ => None,
        }
    }
}

/// Linear solver dispatch configuration.
#[derive(Debug, Clone)]
pub struct LinearSolverConfig {
    pub kind: LinearSolverKind,
    /// Size at or above which `Auto` picks sparse LU.
    pub sparse_threshold: usize,
    pub gmres: GmresConfig,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            kind: LinearSolverKind::Auto,
            sparse_threshold: SPARSE_THRESHOLD,
            gmres: GmresConfig::default(),
        }
    }
}

impl LinearSolverConfig {
    pub fn with_kind(mut self, kind: LinearSolverKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_sparse_threshold(mut self, threshold: usize) -> Self {
        self.sparse_threshold = threshold;
        self
    }

    pub fn with_gmres_config(mut self, config: GmresConfig) -> Self {
        self.gmres = config;
        self
    }

    /// Resolve `Auto` for a system of `size` unknowns.
    pub fn resolve(&self, size: usize) -> LinearSolverKind {
        match self.kind {
            LinearSolverKind::Auto if size >= self.sparse_threshold => LinearSolverKind::Sparse,
            LinearSolverKind::Auto => LinearSolverKind::Dense,
            other => other,
        }
    }

    /// Build a solver for a system of `size` unknowns.
    pub fn create(&self, size: usize) -> Box<dyn LinearSolver> {
        let solver: Box<dyn LinearSolver> = match self.resolve(size) {
            LinearSolverKind::Sparse => Box::new(SparseLu::new()),
            LinearSolverKind::Gmres => Box::new(GmresSolver::new(self.gmres.clone())),
            _ => Box::new(DenseLu::new()),
        };
        log::debug!("using {} for {} unknowns", solver.name(), size);
        solver
    }

    /// Human-readable description of the choice for a size.
    pub fn describe(&self, size: usize) -> &'static str {
        match self.resolve(size) {
            LinearSolverKind::Sparse => "sparse LU",
            LinearSolverKind::Gmres => "GMRES",
            _ => "dense LU",
        }
    }
}
