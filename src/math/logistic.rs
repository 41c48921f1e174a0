//! Numerically stable logistic primitives.
//!
//! The sigmoid model is built from
//!
//! - `q(u) = 1 / (1 + exp(u))`
//! - `softplus(u) = ln(1 + exp(u))`
//!
//! Numerical notes:
//! - `exp(u)` overflows for `u > ~709`; both helpers branch on the sign of `u` so
//!   only `exp(-|u|)` is ever evaluated.
//! - `softplus` uses `ln_1p` to keep precision when `exp(-|u|)` is tiny.

/// `1 / (1 + exp(u))`, in `[0, 1]`.
pub fn logistic_q(u: f64) -> f64 {
    if u >= 0.0 {
        let e = (-u).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + u.exp())
    }
}

/// `ln(1 + exp(u))`, never negative.
pub fn softplus(u: f64) -> f64 {
    if u > 0.0 {
        u + (-u).exp().ln_1p()
    } else {
        u.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_limits_and_midpoint() {
        assert!((logistic_q(0.0) - 0.5).abs() < 1e-15);
        assert!(logistic_q(800.0) >= 0.0 && logistic_q(800.0) < 1e-300);
        assert!((logistic_q(-800.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn softplus_matches_naive_form_in_safe_range() {
        for &u in &[-20.0, -1.0, 0.0, 0.5, 3.0, 30.0] {
            let naive = (1.0 + f64::exp(u)).ln();
            assert!((softplus(u) - naive).abs() < 1e-12, "u={u}");
        }
        assert!(softplus(1000.0).is_finite());
    }
}
