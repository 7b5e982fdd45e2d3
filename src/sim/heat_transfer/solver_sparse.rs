use serde::{Deserialize, Serialize};

use crate::error::NumericalError;
use crate::sim::heat_transfer::network::ConductanceNetwork;

/// Pivots below this fraction of the original diagonal entry are treated as zero.
const PIVOT_TOLERANCE: f64 = 1e-14;

/// Settings for the Jacobi-preconditioned conjugate gradient solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcgSettings {
    /// Maximum number of PCG iterations per time step.
    pub max_iterations: usize,
    /// Relative residual tolerance.
    pub rel_tolerance: f64,
    /// Absolute residual tolerance.
    pub abs_tolerance: f64,
}

impl Default for PcgSettings {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            rel_tolerance: 1e-12,
            abs_tolerance: 1e-12,
        }
    }
}

/// How the implicit system is solved each step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LinearSolverConfig {
    /// Factor once, then two triangular sweeps per step.
    #[default]
    BandedCholesky,
    /// Iterate from the previous field every step.
    ConjugateGradient(PcgSettings),
}

/// Symmetric sparse matrix stored as a diagonal plus per-row off-diagonal lists.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricSparseMatrix {
    diag: Vec<f64>,
    off: Vec<Vec<(usize, f64)>>,
}

impl SymmetricSparseMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            diag: vec![0.0; n],
            off: vec![Vec::new(); n],
        }
    }

    /// Crank-Nicolson left-hand side `C/dt + K/2`.
    pub fn crank_nicolson(capacities: &[f64], network: &ConductanceNetwork, dt: f64) -> Self {
        let mut m = Self::new(capacities.len());
        for (i, &c) in capacities.iter().enumerate() {
            m.add_diagonal(i, c / dt);
        }
        for face in network.faces() {
            let half = 0.5 * face.conductance;
            m.add_diagonal(face.a, half);
            m.add_diagonal(face.b, half);
            m.add_symmetric(face.a, face.b, -half);
        }
        m
    }

    pub fn size(&self) -> usize {
        self.diag.len()
    }

    pub fn diagonal(&self) -> &[f64] {
        &self.diag
    }

    pub fn add_diagonal(&mut self, i: usize, value: f64) {
        self.diag[i] += value;
    }

    /// Add `value` to both `(i, j)` and `(j, i)`.
    pub fn add_symmetric(&mut self, i: usize, j: usize, value: f64) {
        self.off[i].push((j, value));
        self.off[j].push((i, value));
    }

    pub fn bandwidth(&self) -> usize {
        self.off
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().map(move |&(j, _)| i.abs_diff(j)))
            .max()
            .unwrap_or(0)
    }

    /// y = A x
    pub fn apply(&self, x: &[f64], y: &mut [f64]) {
        for i in 0..self.diag.len() {
            let mut sum = self.diag[i] * x[i];
            for &(j, a_ij) in &self.off[i] {
                sum += a_ij * x[j];
            }
            y[i] = sum;
        }
    }
}

/// Cholesky factor `L` of a symmetric positive definite band matrix.
///
/// Row `i` stores `L[i][i - bw ..= i]`, so storage and factorization cost
/// scale with the bandwidth (the lateral node count for 2-D grids).
#[derive(Debug, Clone)]
pub struct BandedCholesky {
    n: usize,
    bw: usize,
    band: Vec<f64>,
}

impl BandedCholesky {
    pub fn factor(matrix: &SymmetricSparseMatrix) -> Result<Self, NumericalError> {
        let n = matrix.size();
        let bw = matrix.bandwidth();
        let width = bw + 1;
        let mut band = vec![0.0; n * width];

        for i in 0..n {
            band[i * width + bw] = matrix.diag[i];
            for &(j, a_ij) in &matrix.off[i] {
                if j < i {
                    band[i * width + (j + bw - i)] += a_ij;
                }
            }
        }

        for i in 0..n {
            let j0 = i.saturating_sub(bw);
            for j in j0..=i {
                let k0 = j0.max(j.saturating_sub(bw));
                let mut sum = band[i * width + (j + bw - i)];
                for k in k0..j {
                    sum -= band[i * width + (k + bw - i)] * band[j * width + (k + bw - j)];
                }
                if i == j {
                    let scale = matrix.diag[i].abs();
                    if !sum.is_finite() || sum <= PIVOT_TOLERANCE * scale {
                        return Err(NumericalError::SingularMatrix { row: i, pivot: sum });
                    }
                    band[i * width + bw] = sum.sqrt();
                } else {
                    band[i * width + (j + bw - i)] = sum / band[j * width + bw];
                }
            }
        }

        Ok(Self { n, bw, band })
    }

    /// Overwrite `b` with the solution of `L L^T x = b`.
    pub fn solve_in_place(&self, b: &mut [f64]) {
        let (n, bw, width) = (self.n, self.bw, self.bw + 1);
        for i in 0..n {
            let mut sum = b[i];
            for k in i.saturating_sub(bw)..i {
                sum -= self.band[i * width + (k + bw - i)] * b[k];
            }
            b[i] = sum / self.band[i * width + bw];
        }
        for i in (0..n).rev() {
            let mut sum = b[i];
            for k in i + 1..n.min(i + bw + 1) {
                sum -= self.band[k * width + (i + bw - k)] * b[k];
            }
            b[i] = sum / self.band[i * width + bw];
        }
    }
}

/// Linear solver bound to one assembled matrix for the whole run.
#[derive(Debug, Clone)]
pub enum LinearSolver {
    Cholesky(BandedCholesky),
    ConjugateGradient {
        matrix: SymmetricSparseMatrix,
        settings: PcgSettings,
    },
}

impl LinearSolver {
    /// Factor or validate `matrix` once before stepping.
    pub fn prepare(
        matrix: SymmetricSparseMatrix,
        config: LinearSolverConfig,
    ) -> Result<Self, NumericalError> {
        match config {
            LinearSolverConfig::BandedCholesky => {
                Ok(LinearSolver::Cholesky(BandedCholesky::factor(&matrix)?))
            }
            LinearSolverConfig::ConjugateGradient(settings) => {
                if let Some((row, &pivot)) = matrix
                    .diag
                    .iter()
                    .enumerate()
                    .find(|&(_, &d)| !d.is_finite() || d <= 0.0)
                {
                    return Err(NumericalError::SingularMatrix { row, pivot });
                }
                Ok(LinearSolver::ConjugateGradient { matrix, settings })
            }
        }
    }

    /// Solve `A x = rhs`. On entry `x` holds the initial guess.
    pub fn solve(&self, rhs: &[f64], x: &mut [f64]) -> Result<(), NumericalError> {
        match self {
            LinearSolver::Cholesky(factor) => {
                x.copy_from_slice(rhs);
                factor.solve_in_place(x);
                Ok(())
            }
            LinearSolver::ConjugateGradient { matrix, settings } => {
                pcg_solve(matrix, rhs, x, *settings)
            }
        }
    }
}

fn pcg_solve(
    matrix: &SymmetricSparseMatrix,
    b: &[f64],
    x: &mut [f64],
    settings: PcgSettings,
) -> Result<(), NumericalError> {
    let n = b.len();
    if n == 0 {
        return Ok(());
    }
    let diag = &matrix.diag;

    let mut ax = vec![0.0; n];
    matrix.apply(x, &mut ax);
    let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect();

    let b_norm = l2_norm(b).max(1.0);
    let tol = settings.abs_tolerance.max(settings.rel_tolerance * b_norm);
    let mut residual = l2_norm(&r);
    if residual <= tol {
        return Ok(());
    }

    let mut z: Vec<f64> = r.iter().zip(diag).map(|(ri, di)| ri / di).collect();
    let mut p = z.clone();
    let mut rz_old = dot(&r, &z);

    let mut ap = vec![0.0; n];
    for _ in 0..settings.max_iterations {
        matrix.apply(&p, &mut ap);
        let denom = dot(&p, &ap);
        if denom.abs() < 1e-300 {
            break;
        }

        let alpha = rz_old / denom;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }

        residual = l2_norm(&r);
        if residual <= tol {
            return Ok(());
        }

        for i in 0..n {
            z[i] = r[i] / diag[i];
        }
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz_old;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
        rz_old = rz_new;
    }

    Err(NumericalError::SolverDidNotConverge {
        iterations: settings.max_iterations,
        residual,
    })
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
