//! Least squares solvers.
//!
//! Two small problems show up repeatedly:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! - during the sigmoid grid search, where the model is linear in `(bottom, top)`
//!   once `(center, width, nu)` are fixed
//! - for drift regressions (straight line or parabola through package averages)
//!
//! Implementation choices:
//! - SVD so tall design matrices are handled robustly.
//!   (Nalgebra's `QR::solve` is intended for square systems.)
//! - The parameter dimension is tiny (2–3 columns), so SVD cost is irrelevant.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Fit `y = c0 + c1 x + ... + c_degree x^degree`.
///
/// Coefficients are returned lowest power first.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Option<Vec<f64>> {
    if x.len() != y.len() || x.len() <= degree {
        return None;
    }
    let cols = degree + 1;
    let design = DMatrix::from_fn(x.len(), cols, |i, j| x[i].powi(j as i32));
    let obs = DVector::from_column_slice(y);
    solve_least_squares(&design, &obs).map(|beta| beta.iter().copied().collect())
}

/// Evaluate a polynomial with coefficients lowest power first (Horner).
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}
