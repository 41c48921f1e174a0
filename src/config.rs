//! `profiler.toml` support.
//!
//! Every key is optional; command-line flags take precedence and built-in
//! defaults fill the rest.
//!
//! ```toml
//! [fit]
//! kind = "richards"
//! max_iterations = 300
//!
//! [calibration]
//! mode = "one-core-to-all"
//! reference_core = "C1"
//! temperature = 12.5
//! salinity = 33.0
//!
//! [threshold]
//! limit_of_detection = 0.3
//!
//! [drift]
//! kind = "polynomial2"
//! slot_minutes = 30
//! ```

use std::path::Path;

use clap::ValueEnum;
use serde::Deserialize;

use crate::domain::{CalibrationMode, RegressionKind, SigmoidKind};
use crate::error::AppError;

/// Calibration strategy as selected from the config file or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationModeKind {
    FromFile,
    PerCore,
    OneCoreToAll,
}

impl CalibrationModeKind {
    /// Full mode; `OneCoreToAll` needs the reference core name.
    pub fn into_mode(self, reference: Option<String>) -> Result<CalibrationMode, AppError> {
        match self {
            CalibrationModeKind::FromFile => Ok(CalibrationMode::FromFile),
            CalibrationModeKind::PerCore => Ok(CalibrationMode::PerCore),
            CalibrationModeKind::OneCoreToAll => reference
                .map(|reference| CalibrationMode::OneCoreToAll { reference })
                .ok_or_else(|| {
                    AppError::new(2, "one-core-to-all calibration needs a reference core")
                }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilerConfig {
    #[serde(default)]
    pub fit: FitConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub drift: DriftConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitConfig {
    pub kind: Option<SigmoidKind>,
    pub max_iterations: Option<usize>,
    pub center_steps: Option<usize>,
    pub width_steps: Option<usize>,
    /// Measurement standard deviation for the reduced chi-square.
    pub sigma: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationConfig {
    pub mode: Option<CalibrationModeKind>,
    pub reference_core: Option<String>,
    /// Overlying water temperature (°C).
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
    /// Fixed upper calibration bound instead of the O2 solubility.
    pub saturation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    pub limit_of_detection: Option<f64>,
    pub sulfidic_front_fraction: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriftConfig {
    pub kind: Option<RegressionKind>,
    pub slot_minutes: Option<i64>,
}

impl ProfilerConfig {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(2, format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, AppError> {
        toml::from_str(content)
            .map_err(|e| AppError::new(2, format!("failed to parse TOML configuration: {e}")))
    }
}
