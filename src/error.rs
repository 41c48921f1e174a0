//! Error types.
//!
//! Two layers:
//!
//! - [`ProfileError`] / [`PreconditionError`] / [`InputError`] are returned by the
//!   library (fitting, calibration, aggregation, drift).
//! - [`AppError`] is what the `profiler` binary reports: a message plus a process
//!   exit code.
//!
//! Exit codes used by the binary:
//! - `2`: input / configuration problems (bad flags, unreadable files)
//! - `3`: data or ordering problems (no usable rows, precondition violations)
//! - `4`: numeric failures (fit divergence, degenerate regressions)

use crate::domain::{Analyte, Stage};

/// Errors raised by the correction / calibration / aggregation engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProfileError {
    /// The optimizer did not converge within its iteration budget.
    #[error("fit did not converge after {iterations} iterations (last SSE {last_sse:.6e})")]
    FitDivergence { iterations: usize, last_sse: f64 },

    /// A caller ordering or setup requirement was violated.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// Data that cannot be processed (too few points, degenerate ranges, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown sample `{0}`")]
    UnknownSample(String),

    #[error("unknown core `{0}`")]
    UnknownCore(String),
}

impl ProfileError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Caller errors: the engine was driven in an order it does not support.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreconditionError {
    #[error("{analyte} core `{core}` cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        analyte: Analyte,
        core: String,
        from: Stage,
        to: Stage,
    },

    #[error("calibration mode is fixed to {current} for this session (requested {requested})")]
    CalibrationModeFixed { current: String, requested: String },

    #[error("no calibration mode has been chosen for this session")]
    CalibrationModeUnset,

    #[error("sample `{0}` has no calibration coefficients embedded in the loaded data")]
    MissingCalibration(String),

    #[error("reference core `{0}` for one-core-to-all calibration is not loaded")]
    UnknownReferenceCore(String),

    #[error("sample `{sample}` trends {observed} but the threshold search expects a {expected} profile")]
    TrendMismatch {
        sample: String,
        expected: &'static str,
        observed: &'static str,
    },

    #[error("`{0}` has not been through interface resolution yet")]
    NotResolved(String),
}

/// Typed failure for numeric user input (thresholds, crop bounds, ...).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("`{field}`: `{raw}` is not a number")]
    NotANumber { field: &'static str, raw: String },

    #[error("`{field}`: value must be finite")]
    NotFinite { field: &'static str },

    #[error("`{field}`: {value} must be > 0")]
    NotPositive { field: &'static str, value: f64 },

    #[error("`{field}`: `{raw}` is not a whole number")]
    NotAWholeNumber { field: &'static str, raw: String },
}

/// Error reported by the `profiler` binary.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<ProfileError> for AppError {
    fn from(err: ProfileError) -> Self {
        let code = match err {
            ProfileError::FitDivergence { .. } => 4,
            ProfileError::Precondition(_)
            | ProfileError::UnknownSample(_)
            | ProfileError::UnknownCore(_) => 3,
            ProfileError::InvalidInput(_) => 3,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        AppError::new(2, err.to_string())
    }
}
