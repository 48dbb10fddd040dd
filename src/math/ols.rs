//! Weighted least squares solvers.
//!
//! Two flavours are used in this project:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! - Small dense problems (drift polynomials, boundary refits): rows are scaled by
//!   `sqrt(w_i)` and the ordinary least squares problem is solved by SVD.
//! - Regression splines: every design row has only `degree + 1` non-zero entries,
//!   so the normal equations `XᵀWX β = XᵀWy` are banded. We accumulate them in band
//!   storage and factor with a banded Cholesky. A vanishing pivot is reported
//!   instead of being regularized away: it means a basis function lacks data.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Pivot below this fraction of its original diagonal entry counts as zero.
const PIVOT_REL_TOL: f64 = 1e-12;

/// Index of the normal-equation column whose Cholesky pivot vanished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingularPivot(pub usize);

/// Symmetric banded normal equations `A β = b`.
///
/// Only the lower band is stored: `band[(d, j)] = A[j + d, j]` for `d <= bandwidth`.
#[derive(Debug, Clone)]
pub struct BandedNormalEquations {
    size: usize,
    bandwidth: usize,
    band: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl BandedNormalEquations {
    pub fn new(size: usize, bandwidth: usize) -> Self {
        Self {
            size,
            bandwidth,
            band: DMatrix::zeros(bandwidth + 1, size),
            rhs: DVector::zeros(size),
        }
    }

    /// Add one weighted observation whose non-zero design entries start at column `start`.
    pub fn accumulate(&mut self, start: usize, row: &[f64], y: f64, weight: f64) {
        debug_assert!(row.len() <= self.bandwidth + 1);
        debug_assert!(start + row.len() <= self.size);
        for (a, &ra) in row.iter().enumerate() {
            let wa = weight * ra;
            self.rhs[start + a] += wa * y;
            for (b, &rb) in row.iter().enumerate().skip(a) {
                self.band[(b - a, start + a)] += wa * rb;
            }
        }
    }

    /// Factor in place and solve. Consumes the system.
    pub fn solve(mut self) -> Result<DVector<f64>, SingularPivot> {
        let n = self.size;
        let bw = self.bandwidth;
        let max_diag = (0..n).map(|j| self.band[(0, j)]).fold(0.0_f64, f64::max);
        if n == 0 {
            return Ok(DVector::zeros(0));
        }
        if !(max_diag.is_finite() && max_diag > 0.0) {
            return Err(SingularPivot(0));
        }

        // Cholesky A = L Lᵀ; L[r, c] overwrites band[(r - c, c)].
        for j in 0..n {
            let original = self.band[(0, j)];
            if !(original > PIVOT_REL_TOL * max_diag) {
                return Err(SingularPivot(j));
            }
            let mut s = original;
            for i in j.saturating_sub(bw)..j {
                let l = self.band[(j - i, i)];
                s -= l * l;
            }
            if !(s.is_finite() && s > PIVOT_REL_TOL * original) {
                return Err(SingularPivot(j));
            }
            let ljj = s.sqrt();
            self.band[(0, j)] = ljj;

            for r in (j + 1)..n.min(j + bw + 1) {
                let mut v = self.band[(r - j, j)];
                for i in r.saturating_sub(bw)..j {
                    v -= self.band[(r - i, i)] * self.band[(j - i, i)];
                }
                self.band[(r - j, j)] = v / ljj;
            }
        }

        // Forward substitution L z = b.
        let mut x = self.rhs;
        for j in 0..n {
            let mut v = x[j];
            for i in j.saturating_sub(bw)..j {
                v -= self.band[(j - i, i)] * x[i];
            }
            x[j] = v / self.band[(0, j)];
        }
        // Back substitution Lᵀ β = z.
        for j in (0..n).rev() {
            let mut v = x[j];
            for r in (j + 1)..n.min(j + bw + 1) {
                v -= self.band[(r - j, j)] * x[r];
            }
            x[j] = v / self.band[(0, j)];
        }

        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(SingularPivot(n - 1))
        }
    }
}
