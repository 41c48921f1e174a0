//! Shared domain enums and small value types.
//!
//! These are kept lightweight and serializable so they can be:
//!
//! - used in-memory by the engine
//! - selected from the CLI / config file
//! - exported with reports

use std::collections::BTreeSet;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Measured quantity of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Analyte {
    O2,
    Ph,
    H2s,
    Ep,
}

impl Analyte {
    pub fn display_name(self) -> &'static str {
        match self {
            Analyte::O2 => "O2",
            Analyte::Ph => "pH",
            Analyte::H2s => "H2S",
            Analyte::Ep => "EP",
        }
    }

    /// Which derivative extremum marks the interface for this analyte.
    ///
    /// O2, pH and redox potential drop across the interface; H2S builds up below it.
    pub fn interface_extremum(self) -> Extremum {
        match self {
            Analyte::O2 | Analyte::Ph | Analyte::Ep => Extremum::Minimum,
            Analyte::H2s => Extremum::Maximum,
        }
    }

    /// Whether the analyte goes through calibration and threshold aggregation.
    pub fn is_calibrated(self) -> bool {
        matches!(self, Analyte::O2 | Analyte::H2s)
    }

    /// Transition table of the per-analyte pipeline.
    pub fn allows(self, from: Stage, to: Stage) -> bool {
        use Stage::*;
        if to == Loaded {
            return true;
        }
        if self.is_calibrated() {
            matches!(
                (from, to),
                (Loaded, SwiResolved)
                    | (SwiResolved, SwiResolved)
                    | (SwiResolved, Calibrated)
                    | (Calibrated, SwiResolved)
                    | (Calibrated, Calibrated)
                    | (Calibrated, Aggregated)
                    | (Aggregated, Aggregated)
                    | (Aggregated, SwiResolved)
                    | (Aggregated, Calibrated)
            )
        } else {
            matches!((from, to), (Loaded, SwiResolved) | (SwiResolved, SwiResolved))
        }
    }
}

impl fmt::Display for Analyte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Which extremum of the fitted derivative is the interface estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extremum {
    Minimum,
    Maximum,
}

/// Pipeline stage of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Loaded,
    SwiResolved,
    Calibrated,
    Aggregated,
}

/// Session-wide calibration strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum CalibrationMode {
    /// Use coefficients embedded in the loaded data.
    FromFile,
    /// Each core uses its own signal bounds.
    PerCore,
    /// One reference core's conversion factor is applied to every core.
    OneCoreToAll { reference: String },
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMode::FromFile => f.write_str("from-file"),
            CalibrationMode::PerCore => f.write_str("per-core"),
            CalibrationMode::OneCoreToAll { reference } => {
                write!(f, "one-core-to-all (reference {reference})")
            }
        }
    }
}

/// Sigmoid family used for the interface fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SigmoidKind {
    /// Symmetric logistic: bottom, top, center, width.
    Logistic,
    /// Generalised (Richards) logistic: adds an asymmetry exponent.
    Richards,
}

impl SigmoidKind {
    pub fn display_name(self) -> &'static str {
        match self {
            SigmoidKind::Logistic => "logistic",
            SigmoidKind::Richards => "richards",
        }
    }

    /// Number of free parameters.
    pub fn param_count(self) -> usize {
        match self {
            SigmoidKind::Logistic => 4,
            SigmoidKind::Richards => 5,
        }
    }
}

/// Regression used across drift packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegressionKind {
    Linear,
    #[value(name = "polynomial2")]
    Polynomial2,
}

impl RegressionKind {
    pub fn degree(self) -> usize {
        match self {
            RegressionKind::Linear => 1,
            RegressionKind::Polynomial2 => 2,
        }
    }

    pub fn coefficient_count(self) -> usize {
        self.degree() + 1
    }
}

/// Reduced chi-square at or below which a fit is "excellent".
pub const EXCELLENT_CHI_SQUARE: f64 = 3.0;
/// Reduced chi-square at or below which a fit is "acceptable".
pub const ACCEPTABLE_CHI_SQUARE: f64 = 10.0;

/// Advisory fit quality. Never used to reject a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitQuality {
    Excellent,
    Acceptable,
    Poor,
}

impl FitQuality {
    pub fn from_reduced_chi_square(chi: f64) -> Self {
        if chi <= EXCELLENT_CHI_SQUARE {
            FitQuality::Excellent
        } else if chi <= ACCEPTABLE_CHI_SQUARE {
            FitQuality::Acceptable
        } else {
            // NaN lands here as well.
            FitQuality::Poor
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FitQuality::Excellent => "excellent",
            FitQuality::Acceptable => "acceptable",
            FitQuality::Poor => "poor",
        }
    }
}

/// Per-core set of samples excluded from aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilitySet {
    excluded: BTreeSet<String>,
}

impl VisibilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `sample` and return the new set.
    pub fn toggle(&self, sample: &str) -> VisibilitySet {
        let mut excluded = self.excluded.clone();
        if !excluded.remove(sample) {
            excluded.insert(sample.to_string());
        }
        VisibilitySet { excluded }
    }

    pub fn is_excluded(&self, sample: &str) -> bool {
        self.excluded.contains(sample)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}
