//! Cubic B-spline bases with difference penalties (P-splines).
//!
//! The smooth terms of the trajectory model are built from a cubic B-spline
//! basis on equispaced knots, penalized by the squared second differences of
//! adjacent coefficients. The penalty null space is {constant, linear}, so a
//! heavily penalized smooth degenerates to a straight line rather than to
//! zero.
//!
//! Numerical notes:
//! - Equispaced knots keep every Cox–de Boor denominator strictly positive.
//! - The right domain edge is half-open in the recursion; we nudge `x_max`
//!   inward by a relative epsilon so boundary observations still land in the
//!   last segment.

use nalgebra::DMatrix;

use crate::error::AppError;

/// Cubic B-spline basis over `[x_min, x_max]`.
#[derive(Debug, Clone)]
pub struct BSplineBasis {
    degree: usize,
    knots: Vec<f64>,
    n_basis: usize,
    x_min: f64,
    x_max: f64,
}

impl BSplineBasis {
    /// Build a cubic basis with `n_basis` functions (requires `n_basis >= 4`).
    pub fn cubic(x_min: f64, x_max: f64, n_basis: usize) -> Result<Self, AppError> {
        if !(x_min.is_finite() && x_max.is_finite() && x_max > x_min) {
            return Err(AppError::internal(format!(
                "Invalid spline domain: [{x_min}, {x_max}]."
            )));
        }
        if n_basis < 4 {
            return Err(AppError::insufficient_data(format!(
                "Cubic spline basis needs at least 4 functions, got {n_basis}."
            )));
        }

        let degree = 3usize;
        let segments = n_basis - degree;
        let h = (x_max - x_min) / segments as f64;

        // n_basis + degree + 1 knots, extended `degree` segments past each edge.
        let knots: Vec<f64> = (0..n_basis + degree + 1)
            .map(|i| x_min + (i as f64 - degree as f64) * h)
            .collect();

        Ok(Self {
            degree,
            knots,
            n_basis,
            x_min,
            x_max,
        })
    }

    pub fn n_basis(&self) -> usize {
        self.n_basis
    }

    /// Evaluate all basis functions at `x` into `out` (length `n_basis`).
    ///
    /// Values outside the domain are clamped to the nearest edge.
    pub fn eval_into(&self, x: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.n_basis);

        let span = self.x_max - self.x_min;
        let u = x.clamp(self.x_min, self.x_max - 1e-12 * span.max(1.0));

        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.cox_de_boor(i, self.degree, u);
        }
    }

    /// Build the `xs.len() x n_basis` design matrix.
    pub fn design(&self, xs: &[f64]) -> DMatrix<f64> {
        let mut m = DMatrix::<f64>::zeros(xs.len(), self.n_basis);
        let mut row = vec![0.0; self.n_basis];
        for (i, &x) in xs.iter().enumerate() {
            self.eval_into(x, &mut row);
            for (j, &v) in row.iter().enumerate() {
                m[(i, j)] = v;
            }
        }
        m
    }

    fn cox_de_boor(&self, i: usize, p: usize, u: f64) -> f64 {
        if p == 0 {
            return if self.knots[i] <= u && u < self.knots[i + 1] {
                1.0
            } else {
                0.0
            };
        }

        let mut value = 0.0;
        let d_left = self.knots[i + p] - self.knots[i];
        if d_left > 0.0 {
            value += (u - self.knots[i]) / d_left * self.cox_de_boor(i, p - 1, u);
        }
        let d_right = self.knots[i + p + 1] - self.knots[i + 1];
        if d_right > 0.0 {
            value += (self.knots[i + p + 1] - u) / d_right * self.cox_de_boor(i + 1, p - 1, u);
        }
        value
    }
}

/// Second-order difference rows `D` (size `(n_basis - 2) x n_basis`), so the
/// smoothness penalty is `λ · βᵀDᵀDβ`.
pub fn second_difference_rows(n_basis: usize) -> DMatrix<f64> {
    let rows = n_basis.saturating_sub(2);
    let mut d = DMatrix::<f64>::zeros(rows, n_basis);
    for r in 0..rows {
        d[(r, r)] = 1.0;
        d[(r, r + 1)] = -2.0;
        d[(r, r + 2)] = 1.0;
    }
    d
}
