//! Parsing of numeric values typed by the user (thresholds, crop bounds, ...).
//!
//! Malformed input is reported; the caller decides whether to keep the previous value.

use crate::error::InputError;

fn parse_finite(field: &'static str, raw: &str) -> Result<f64, InputError> {
    let value: f64 = raw.trim().parse().map_err(|_| InputError::NotANumber {
        field,
        raw: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(InputError::NotFinite { field });
    }
    Ok(value)
}

/// A threshold concentration; zero and negative levels are allowed.
pub fn parse_threshold(raw: &str) -> Result<f64, InputError> {
    parse_finite("threshold", raw)
}

/// A crop bound or outlier depth.
pub fn parse_depth_bound(raw: &str) -> Result<f64, InputError> {
    parse_finite("depth", raw)
}

/// Strictly positive quantity such as a saturation bound.
pub fn parse_positive(field: &'static str, raw: &str) -> Result<f64, InputError> {
    ensure_positive(field, parse_finite(field, raw)?)
}

/// Same check for values that arrive already parsed (config files).
pub fn ensure_positive(field: &'static str, value: f64) -> Result<f64, InputError> {
    if !value.is_finite() {
        return Err(InputError::NotFinite { field });
    }
    if value <= 0.0 {
        return Err(InputError::NotPositive { field, value });
    }
    Ok(value)
}

/// Drift slot length in whole minutes.
pub fn parse_slot_minutes(raw: &str) -> Result<i64, InputError> {
    let minutes: i64 = raw.trim().parse().map_err(|_| InputError::NotAWholeNumber {
        field: "slot_minutes",
        raw: raw.to_string(),
    })?;
    ensure_slot_minutes(minutes)
}

pub fn ensure_slot_minutes(minutes: i64) -> Result<i64, InputError> {
    if minutes <= 0 {
        return Err(InputError::NotPositive {
            field: "slot_minutes",
            value: minutes as f64,
        });
    }
    Ok(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_surrounding_whitespace() {
        assert_eq!(parse_threshold(" 0.5 "), Ok(0.5));
        assert_eq!(parse_depth_bound("-1200"), Ok(-1200.0));
    }

    #[test]
    fn rejects_garbage_and_non_finite() {
        assert_eq!(
            parse_threshold("abc"),
            Err(InputError::NotANumber {
                field: "threshold",
                raw: "abc".into()
            })
        );
        assert_eq!(parse_depth_bound("inf"), Err(InputError::NotFinite { field: "depth" }));
        assert!(parse_threshold("NaN").is_err());
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(matches!(
            parse_positive("saturation", "0"),
            Err(InputError::NotPositive { .. })
        ));
        assert_eq!(parse_positive("saturation", "250"), Ok(250.0));
        assert!(matches!(
            parse_positive("saturation", "-3"),
            Err(InputError::NotPositive { .. })
        ));
        assert_eq!(
            ensure_positive("sigma", f64::NAN),
            Err(InputError::NotFinite { field: "sigma" })
        );
    }

    #[test]
    fn slot_minutes_are_positive_whole_numbers() {
        assert_eq!(parse_slot_minutes(" 90 "), Ok(90));
        assert!(matches!(
            parse_slot_minutes("1.5"),
            Err(InputError::NotAWholeNumber { .. })
        ));
        assert!(matches!(
            parse_slot_minutes("0"),
            Err(InputError::NotPositive { .. })
        ));
        assert!(ensure_slot_minutes(-60).is_err());
    }
}
