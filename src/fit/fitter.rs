//! Sigmoid fitting for a single depth profile.
//!
//! Given:
//! - depths `x_i`
//! - observed signal `y_i`
//! - optionally the parameters of a previous fit
//!
//! we:
//! - seed the shape parameters by grid search (each node solves a linear
//!   least squares problem for `bottom` / `top`), unless a previous fit is given
//! - refine all parameters with Levenberg–Marquardt
//! - evaluate the fitted curve and its analytic derivative on the input domain
//!
//! Non-convergence within the iteration budget is reported as
//! [`ProfileError::FitDivergence`]; callers decide on the fallback.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Extremum, FitQuality, Profile, SigmoidKind};
use crate::error::ProfileError;
use crate::fit::grid::{shape_grid, ShapeNode};
use crate::math::solve_least_squares;
use crate::models::{derivative, fill_jacobian_row, predict, SigmoidParams};

/// Damping above which the optimizer is considered stuck at a stationary point.
const LAMBDA_MAX: f64 = 1e16;
const LAMBDA_MIN: f64 = 1e-12;
/// Admissible range of the Richards asymmetry exponent.
const NU_MIN: f64 = 0.05;
const NU_MAX: f64 = 20.0;

/// Options that affect how each profile is fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    pub kind: SigmoidKind,
    /// Levenberg–Marquardt iteration budget.
    pub max_iterations: usize,
    /// Grid nodes along the depth axis for the transition center.
    pub center_steps: usize,
    /// Log-spaced grid nodes for the transition width.
    pub width_steps: usize,
    /// Measurement standard deviation used in the reduced chi-square.
    pub sigma: f64,
    /// Relative SSE decrease below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            kind: SigmoidKind::Logistic,
            max_iterations: 200,
            center_steps: 41,
            width_steps: 25,
            sigma: 1.0,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

/// Outcome of one sigmoid fit. Recreated on every fit, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    kind: SigmoidKind,
    params: SigmoidParams,
    depths: Vec<f64>,
    fitted: Vec<f64>,
    derivative: Vec<f64>,
    sse: f64,
    reduced_chi_square: f64,
    quality: FitQuality,
    iterations: usize,
}

impl FitResult {
    pub fn kind(&self) -> SigmoidKind {
        self.kind
    }

    pub fn params(&self) -> &SigmoidParams {
        &self.params
    }

    /// Depth domain the curves are evaluated on (same as the fitted input).
    pub fn depths(&self) -> &[f64] {
        &self.depths
    }

    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    pub fn derivative(&self) -> &[f64] {
        &self.derivative
    }

    pub fn sse(&self) -> f64 {
        self.sse
    }

    pub fn reduced_chi_square(&self) -> f64 {
        self.reduced_chi_square
    }

    pub fn quality(&self) -> FitQuality {
        self.quality
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn n_points(&self) -> usize {
        self.depths.len()
    }

    /// Depth of the derivative extremum (first index wins on ties).
    pub fn interface_depth(&self, extremum: Extremum) -> f64 {
        let mut best = 0;
        for (i, &d) in self.derivative.iter().enumerate().skip(1) {
            let better = match extremum {
                Extremum::Minimum => d < self.derivative[best],
                Extremum::Maximum => d > self.derivative[best],
            };
            if better {
                best = i;
            }
        }
        self.depths[best]
    }
}

/// Fits sigmoid models to depth profiles.
#[derive(Debug, Clone, Default)]
pub struct CurveFitEngine {
    options: FitOptions,
}

impl CurveFitEngine {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Fit `profile`, optionally seeded with `previous` parameters.
    pub fn fit(
        &self,
        profile: &Profile,
        previous: Option<&SigmoidParams>,
    ) -> Result<FitResult, ProfileError> {
        let opts = &self.options;
        let kind = opts.kind;
        let p = kind.param_count();
        let n = profile.len();
        if n < p + 1 {
            return Err(ProfileError::invalid(format!(
                "sample `{}`: {n} points cannot constrain a {}-parameter {} fit",
                profile.sample(),
                p,
                kind.display_name()
            )));
        }
        if !(opts.sigma.is_finite() && opts.sigma > 0.0) {
            return Err(ProfileError::invalid("fit sigma must be finite and > 0"));
        }

        let x = profile.depths();
        let y = profile.signal();

        let seeded = previous
            .filter(|prev| admissible(kind, &prev.to_vec(kind)))
            .map(|prev| levenberg_marquardt(kind, x, y, *prev, opts));

        let (params, sse, iterations) = match seeded {
            Some(Ok(found)) => found,
            Some(Err(err)) => {
                log::debug!(
                    "sample `{}`: seeded fit failed ({err}); retrying from grid search",
                    profile.sample()
                );
                let seed = grid_search(kind, x, y, opts)?;
                levenberg_marquardt(kind, x, y, seed, opts)?
            }
            None => {
                let seed = grid_search(kind, x, y, opts)?;
                levenberg_marquardt(kind, x, y, seed, opts)?
            }
        };

        let dof = (n - p) as f64;
        let reduced_chi_square = sse / (opts.sigma * opts.sigma) / dof;
        let quality = FitQuality::from_reduced_chi_square(reduced_chi_square);

        log::debug!(
            "sample `{}`: {} fit center={:.4} width={:.4} redchi={:.4} after {iterations} iterations",
            profile.sample(),
            kind.display_name(),
            params.center,
            params.width,
            reduced_chi_square
        );

        Ok(FitResult {
            kind,
            params,
            depths: x.to_vec(),
            fitted: x.iter().map(|&d| predict(&params, d)).collect(),
            derivative: x.iter().map(|&d| derivative(&params, d)).collect(),
            sse,
            reduced_chi_square,
            quality,
            iterations,
        })
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    params: SigmoidParams,
    sse: f64,
}

/// Pick the best grid node; linear `(bottom, top)` are solved per node.
fn grid_search(
    kind: SigmoidKind,
    x: &[f64],
    y: &[f64],
    opts: &FitOptions,
) -> Result<SigmoidParams, ProfileError> {
    let (lo, hi) = (x[0], x[x.len() - 1]);
    let grid = shape_grid(kind, lo, hi, opts.center_steps, opts.width_steps)?;

    // Evaluate each node independently (parallel).
    let candidates: Vec<Candidate> = grid
        .par_iter()
        .enumerate()
        .filter_map(|(idx, node)| {
            evaluate_node(node, x, y).map(|(params, sse)| Candidate { idx, params, sse })
        })
        .collect();

    if candidates.is_empty() {
        return Err(ProfileError::invalid("no valid sigmoid grid candidates"));
    }

    // Deterministic selection: pick the minimum SSE; break ties by original grid index.
    let mut best = &candidates[0];
    for c in &candidates[1..] {
        if c.sse < best.sse || (c.sse == best.sse && c.idx < best.idx) {
            best = c;
        }
    }

    Ok(best.params)
}

fn evaluate_node(node: &ShapeNode, x: &[f64], y: &[f64]) -> Option<(SigmoidParams, f64)> {
    let n = x.len();
    let mut design = DMatrix::<f64>::zeros(n, 2);
    for (i, &xi) in x.iter().enumerate() {
        let g = crate::models::basis(xi, node.center, node.width, node.nu);
        design[(i, 0)] = 1.0 - g;
        design[(i, 1)] = g;
    }
    let obs = DVector::from_column_slice(y);
    let beta = solve_least_squares(&design, &obs)?;

    let params = SigmoidParams {
        bottom: beta[0],
        top: beta[1],
        center: node.center,
        width: node.width,
        nu: node.nu,
    };
    let sse = sum_squared_residuals(&params, x, y);
    sse.is_finite().then_some((params, sse))
}

fn sum_squared_residuals(params: &SigmoidParams, x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - predict(params, xi);
            r * r
        })
        .sum()
}

fn admissible(kind: SigmoidKind, theta: &[f64]) -> bool {
    if theta.iter().any(|v| !v.is_finite()) || theta[3] <= 0.0 {
        return false;
    }
    kind == SigmoidKind::Logistic || (NU_MIN..=NU_MAX).contains(&theta[4])
}

/// Levenberg–Marquardt with Marquardt's diagonal scaling.
///
/// Returns `(params, sse, iterations)`.
fn levenberg_marquardt(
    kind: SigmoidKind,
    x: &[f64],
    y: &[f64],
    seed: SigmoidParams,
    opts: &FitOptions,
) -> Result<(SigmoidParams, f64, usize), ProfileError> {
    let p = kind.param_count();
    let n = x.len();
    let mut theta = DVector::from_vec(seed.to_vec(kind));
    let mut params = seed;
    let mut sse = sum_squared_residuals(&params, x, y);
    if !sse.is_finite() {
        return Err(ProfileError::FitDivergence {
            iterations: 0,
            last_sse: sse,
        });
    }

    let zero_sse = 1e-28 * (1.0 + y.iter().map(|v| v * v).sum::<f64>());
    let mut lambda = 1e-3;
    let mut row = vec![0.0; p];

    for iter in 1..=opts.max_iterations {
        if sse <= zero_sse {
            return Ok((params, sse, iter - 1));
        }

        let mut jac = DMatrix::<f64>::zeros(n, p);
        let mut resid = DVector::<f64>::zeros(n);
        for i in 0..n {
            fill_jacobian_row(kind, &params, x[i], &mut row);
            for j in 0..p {
                jac[(i, j)] = row[j];
            }
            resid[i] = y[i] - predict(&params, x[i]);
        }
        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &resid;

        let mut damped = jtj.clone();
        for k in 0..p {
            damped[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
        }

        let step = match damped.cholesky() {
            Some(chol) => chol.solve(&jtr),
            None => {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return Ok((params, sse, iter));
                }
                continue;
            }
        };

        let candidate = &theta + &step;
        if !admissible(kind, candidate.as_slice()) {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                return Ok((params, sse, iter));
            }
            continue;
        }

        let candidate_params = SigmoidParams::from_slice(kind, candidate.as_slice());
        let candidate_sse = sum_squared_residuals(&candidate_params, x, y);

        if candidate_sse.is_finite() && candidate_sse < sse {
            let rel_drop = (sse - candidate_sse) / sse;
            let rel_step = step.norm() / (theta.norm() + opts.xtol);
            theta = candidate;
            params = candidate_params;
            sse = candidate_sse;
            lambda = (lambda / 10.0).max(LAMBDA_MIN);
            if rel_drop < opts.ftol || rel_step < opts.xtol {
                return Ok((params, sse, iter));
            }
        } else {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                return Ok((params, sse, iter));
            }
        }
    }

    Err(ProfileError::FitDivergence {
        iterations: opts.max_iterations,
        last_sse: sse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn sigmoid_profile(params: &SigmoidParams, noise: Option<(f64, u64)>) -> Profile {
        let depths: Vec<f64> = (0..=160).map(|i| -2000.0 + 25.0 * i as f64).collect();
        let mut signal: Vec<f64> = depths.iter().map(|&d| predict(params, d)).collect();
        if let Some((sd, seed)) = noise {
            let mut rng = StdRng::seed_from_u64(seed);
            let normal = Normal::new(0.0, sd).unwrap();
            for v in &mut signal {
                *v += normal.sample(&mut rng);
            }
        }
        Profile::new("synthetic", depths, signal).unwrap()
    }

    fn truth() -> SigmoidParams {
        SigmoidParams {
            top: 280.0,
            bottom: 2.0,
            center: 137.0,
            width: 160.0,
            nu: 1.0,
        }
    }

    #[test]
    fn recovers_known_inflection_on_exact_data() {
        let profile = sigmoid_profile(&truth(), None);
        let fit = CurveFitEngine::default().fit(&profile, None).unwrap();

        assert!((fit.params().center - 137.0).abs() < 1e-3);
        assert!((fit.params().top - 280.0).abs() < 1e-3);
        let estimate = fit.interface_depth(Extremum::Minimum);
        // 1% of the 4000 µm depth range.
        assert!((estimate - 137.0).abs() <= 40.0, "estimate={estimate}");
        assert_eq!(fit.quality(), FitQuality::Excellent);
        assert_eq!(fit.fitted().len(), profile.len());
        assert_eq!(fit.derivative().len(), profile.len());
    }

    #[test]
    fn recovers_inflection_on_noisy_data() {
        let profile = sigmoid_profile(&truth(), Some((3.0, 7)));
        let fit = CurveFitEngine::default().fit(&profile, None).unwrap();
        let estimate = fit.interface_depth(Extremum::Minimum);
        assert!((estimate - 137.0).abs() <= 40.0, "estimate={estimate}");
        // sigma=1 while the noise sd is 3: reduced chi-square lands near 9.
        assert!(fit.reduced_chi_square() > 3.0);
    }

    #[test]
    fn richards_fit_locates_asymmetric_inflection() {
        let params = SigmoidParams { nu: 2.0, ..truth() };
        let profile = sigmoid_profile(&params, Some((1.0, 11)));
        let engine = CurveFitEngine::new(FitOptions {
            kind: SigmoidKind::Richards,
            ..FitOptions::default()
        });
        let fit = engine.fit(&profile, None).unwrap();
        let estimate = fit.interface_depth(Extremum::Minimum);
        assert!((estimate - params.inflection()).abs() <= 40.0, "estimate={estimate}");
    }

    #[test]
    fn rising_profile_uses_maximum() {
        let params = SigmoidParams {
            top: 0.0,
            bottom: 400.0,
            ..truth()
        };
        let profile = sigmoid_profile(&params, None);
        let fit = CurveFitEngine::default().fit(&profile, None).unwrap();
        assert!((fit.interface_depth(Extremum::Maximum) - 137.0).abs() <= 40.0);
    }

    #[test]
    fn seeded_fit_reaches_same_solution() {
        let profile = sigmoid_profile(&truth(), Some((2.0, 3)));
        let engine = CurveFitEngine::default();
        let first = engine.fit(&profile, None).unwrap();
        let second = engine.fit(&profile, Some(first.params())).unwrap();
        assert!((first.params().center - second.params().center).abs() < 1e-3);
        assert!((first.sse() - second.sse()).abs() <= 1e-6 * first.sse());
    }

    #[test]
    fn too_few_points_is_invalid_input() {
        let profile = Profile::new("s", vec![0.0, 1.0, 2.0], vec![3.0, 2.0, 1.0]).unwrap();
        let err = CurveFitEngine::default().fit(&profile, None).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidInput(_)));
    }

    #[test]
    fn exhausted_budget_is_divergence() {
        let params = SigmoidParams { nu: 2.5, ..truth() };
        let profile = sigmoid_profile(&params, Some((1.0, 5)));
        let engine = CurveFitEngine::new(FitOptions {
            kind: SigmoidKind::Richards,
            max_iterations: 1,
            ..FitOptions::default()
        });
        let err = engine.fit(&profile, None).unwrap_err();
        assert!(matches!(err, ProfileError::FitDivergence { iterations: 1, .. }));
    }
}
