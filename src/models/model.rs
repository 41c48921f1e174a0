//! Sigmoid model evaluation.
//!
//! ```text
//! u(x) = (x - center) / width
//! g(x) = (1 + exp(u))^(-nu)
//! y(x) = bottom + (top - bottom) * g(x)
//! ```
//!
//! The fitter relies on three primitive operations implemented here:
//! - `basis`: `g(x)` for fixed `(center, width, nu)` (the model is linear in
//!   `bottom` and `top` given the basis, which the grid search exploits)
//! - `predict` / `derivative`: `y(x)` and `dy/dx`
//! - `fill_jacobian_row`: `∂y/∂θ` for Levenberg–Marquardt

use serde::{Deserialize, Serialize};

use crate::domain::SigmoidKind;
use crate::math::{logistic_q, softplus};

/// Fitted sigmoid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmoidParams {
    /// Shallow asymptote (overlying water side).
    pub top: f64,
    /// Deep asymptote.
    pub bottom: f64,
    /// Location of the transition.
    pub center: f64,
    /// Transition width in depth units, always > 0.
    pub width: f64,
    /// Asymmetry exponent (1 for the symmetric logistic).
    pub nu: f64,
}

impl SigmoidParams {
    /// Flatten into the optimizer vector for `kind`.
    pub fn to_vec(&self, kind: SigmoidKind) -> Vec<f64> {
        match kind {
            SigmoidKind::Logistic => vec![self.bottom, self.top, self.center, self.width],
            SigmoidKind::Richards => {
                vec![self.bottom, self.top, self.center, self.width, self.nu]
            }
        }
    }

    /// Inverse of [`SigmoidParams::to_vec`].
    ///
    /// # Panics
    /// Panics if `theta` is shorter than `kind.param_count()`.
    pub fn from_slice(kind: SigmoidKind, theta: &[f64]) -> Self {
        Self {
            bottom: theta[0],
            top: theta[1],
            center: theta[2],
            width: theta[3],
            nu: match kind {
                SigmoidKind::Logistic => 1.0,
                SigmoidKind::Richards => theta[4],
            },
        }
    }

    /// Depth of the steepest point of the curve.
    ///
    /// For the symmetric logistic this is `center`; Richards curves shift it by
    /// `width * ln(1/nu)`.
    pub fn inflection(&self) -> f64 {
        self.center - self.width * self.nu.ln()
    }
}

/// `g(x)` for fixed shape parameters.
pub fn basis(x: f64, center: f64, width: f64, nu: f64) -> f64 {
    let q = logistic_q((x - center) / width);
    q.powf(nu)
}

/// Predict `y(x)`.
pub fn predict(params: &SigmoidParams, x: f64) -> f64 {
    let g = basis(x, params.center, params.width, params.nu);
    params.bottom + (params.top - params.bottom) * g
}

/// First derivative `dy/dx`.
pub fn derivative(params: &SigmoidParams, x: f64) -> f64 {
    let q = logistic_q((x - params.center) / params.width);
    let dg_du = -params.nu * q.powf(params.nu) * (1.0 - q);
    (params.top - params.bottom) * dg_du / params.width
}

/// Fill `∂y/∂θ` at `x` in the parameter order of [`SigmoidParams::to_vec`].
///
/// # Panics
/// Panics if `out` is shorter than `kind.param_count()`.
pub fn fill_jacobian_row(kind: SigmoidKind, params: &SigmoidParams, x: f64, out: &mut [f64]) {
    let u = (x - params.center) / params.width;
    let q = logistic_q(u);
    let g = q.powf(params.nu);
    let amplitude = params.top - params.bottom;
    // dg/du = -nu * g * (1 - q)
    let dg_du = -params.nu * g * (1.0 - q);

    out[0] = 1.0 - g;
    out[1] = g;
    out[2] = amplitude * dg_du * (-1.0 / params.width);
    out[3] = amplitude * dg_du * (-u / params.width);
    if kind == SigmoidKind::Richards {
        // dg/dnu = g * ln q = -g * softplus(u)
        out[4] = amplitude * (-g * softplus(u));
    }
}
