//! Shape-parameter grid generation.
//!
//! The sigmoid fit is seeded by a deterministic grid search over the nonlinear
//! shape parameters `(center, width[, nu])`.
//! The best node becomes the Levenberg–Marquardt starting point.

use crate::domain::SigmoidKind;
use crate::error::ProfileError;

/// Asymmetry exponents tried for the Richards curve.
pub const NU_GRID: [f64; 3] = [0.5, 1.0, 2.0];

/// One grid node: fixed shape parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeNode {
    pub center: f64,
    pub width: f64,
    pub nu: f64,
}

/// Generate `steps` linearly spaced points between `min` and `max` (inclusive).
pub fn lin_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, ProfileError> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(ProfileError::invalid(format!(
            "invalid grid range: min={min}, max={max}"
        )));
    }
    if steps < 2 {
        return Err(ProfileError::invalid("grid steps must be >= 2"));
    }
    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, ProfileError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > min) {
        return Err(ProfileError::invalid(format!(
            "invalid log grid range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    let logs = lin_space(min.ln(), max.ln(), steps)?;
    Ok(logs.into_iter().map(f64::exp).collect())
}

/// Shape grid over a depth range.
///
/// Centers span the whole range; widths span `range/500 .. range/2`.
pub fn shape_grid(
    kind: SigmoidKind,
    depth_min: f64,
    depth_max: f64,
    center_steps: usize,
    width_steps: usize,
) -> Result<Vec<ShapeNode>, ProfileError> {
    let range = depth_max - depth_min;
    let centers = lin_space(depth_min, depth_max, center_steps)?;
    let widths = log_space(range / 500.0, range / 2.0, width_steps)?;
    let nus: &[f64] = match kind {
        SigmoidKind::Logistic => &[1.0],
        SigmoidKind::Richards => &NU_GRID,
    };

    let mut out = Vec::with_capacity(centers.len() * widths.len() * nus.len());
    for &center in &centers {
        for &width in &widths {
            for &nu in nus {
                out.push(ShapeNode { center, width, nu });
            }
        }
    }
    Ok(out)
}
