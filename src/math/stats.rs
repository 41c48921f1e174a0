//! Small descriptive statistics used by aggregation and drift correction.

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`), `None` for an empty slice.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Least-squares slope of `y` against `x`; `None` when `x` has no spread.
pub fn slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let xm = mean(x)?;
    let ym = mean(y)?;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - xm;
        cov += dx * (yi - ym);
        var += dx * dx;
    }
    if var <= 1e-300 {
        return None;
    }
    Some(cov / var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_std_of_three_points() {
        let v = [10.0, 20.0, 30.0];
        assert_eq!(mean(&v), Some(20.0));
        let expected = (200.0_f64 / 3.0).sqrt();
        assert!((population_std(&v).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_is_undefined() {
        assert_eq!(mean(&[]), None);
        assert_eq!(population_std(&[]), None);
    }

    #[test]
    fn slope_sign() {
        assert!(slope(&[0.0, 1.0, 2.0], &[3.0, 2.0, 1.0]).unwrap() < 0.0);
        assert_eq!(slope(&[1.0, 1.0], &[0.0, 1.0]), None);
    }
}
