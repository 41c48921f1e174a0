//! Run reports: what the pipeline produced, ready to print or export.

use serde::Serialize;

use crate::calibration::{ConversionFactor, SampleSulfide};
use crate::domain::{Analyte, CalibrationMode};
use crate::drift::PackageFit;
use crate::error::ProfileError;
use crate::session::AnalysisSession;
use crate::swi::CoreResolution;
use crate::threshold::{Aggregate, ThresholdRecord};

pub mod format;

pub use format::*;

#[derive(Debug, Clone, Serialize)]
pub struct CoreReport {
    pub resolution: CoreResolution,
    pub calibration: Option<ConversionFactor>,
    pub crossings: Vec<ThresholdRecord>,
    pub aggregate: Option<Aggregate>,
    pub sulfide: Vec<SampleSulfide>,
    /// Why the interface of this core could not be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub analyte: Analyte,
    pub calibration_mode: Option<CalibrationMode>,
    pub threshold_label: Option<String>,
    pub cores: Vec<CoreReport>,
    pub drift: Vec<PackageFit>,
}

impl RunReport {
    /// Snapshot of every core in `session`, in core-name order.
    pub fn from_session(session: &AnalysisSession) -> Result<Self, ProfileError> {
        let mut cores = Vec::new();
        for name in session.core_names() {
            let thresholds = session.thresholds(name)?;
            cores.push(CoreReport {
                resolution: session.resolver(name)?.resolution(),
                calibration: session.calibrated(name)?.and_then(|c| c.factor),
                crossings: thresholds.map(|t| t.records().to_vec()).unwrap_or_default(),
                aggregate: thresholds.map(|t| t.aggregate().clone()),
                sulfide: Vec::new(),
                failure: None,
            });
        }
        Ok(Self {
            analyte: session.analyte(),
            calibration_mode: session.calibration_mode().cloned(),
            threshold_label: session.threshold().map(|t| t.label.clone()),
            cores,
            drift: Vec::new(),
        })
    }
}
