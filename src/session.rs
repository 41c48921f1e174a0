//! Analysis session: the state of every core of one analyte.
//!
//! Each core moves through
//!
//! ```text
//! Loaded -> SwiResolved -> Calibrated -> Aggregated
//! ```
//!
//! following [`Analyte::allows`]. pH and EP profiles stop after interface
//! resolution. Revising a resolved core (commit, reset) moves it back to
//! `SwiResolved`, which drops its calibration and threshold table so nothing
//! downstream is computed from a stale profile.
//!
//! The calibration mode is chosen once per session and cannot change afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::calibration::{
    total_sulfide_for_core, CalibratedCore, CalibrationResolver, CorrelationTable, FixedSaturation,
    GarciaGordon, SampleSulfide, Solubility, WaterConditions,
};
use crate::domain::{Analyte, CalibrationMode, Core, Stage};
use crate::error::{PreconditionError, ProfileError};
use crate::fit::{CurveFitEngine, FitOptions};
use crate::swi::{CoreResolution, RefitOutcome, SwiResolver};
use crate::threshold::{Aggregate, CoreThresholds, ThresholdSpec};

/// Knobs shared by every core of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub fit: FitOptions,
    pub conditions: WaterConditions,
    /// Fixed saturation bound. `None` uses Garcia & Gordon for O2 and `1.0`
    /// (normalised concentration) for the other analytes.
    pub saturation: Option<f64>,
    /// Threshold for aggregation; `None` uses the analyte default.
    pub threshold: Option<ThresholdSpec>,
}

#[derive(Debug, Clone)]
struct CoreEntry {
    raw: Core,
    stage: Stage,
    swi: SwiResolver,
    calibrated: Option<CalibratedCore>,
    thresholds: Option<CoreThresholds>,
}

pub struct AnalysisSession {
    analyte: Analyte,
    engine: CurveFitEngine,
    conditions: WaterConditions,
    solubility: Arc<dyn Solubility>,
    threshold: Option<ThresholdSpec>,
    calibration_mode: Option<CalibrationMode>,
    cores: BTreeMap<String, CoreEntry>,
}

impl AnalysisSession {
    pub fn new(analyte: Analyte, options: SessionOptions) -> Self {
        let solubility: Arc<dyn Solubility> = match (options.saturation, analyte) {
            (Some(sat), _) => Arc::new(FixedSaturation(sat)),
            (None, Analyte::O2) => Arc::new(GarciaGordon),
            (None, _) => Arc::new(FixedSaturation(1.0)),
        };
        Self {
            analyte,
            engine: CurveFitEngine::new(options.fit),
            conditions: options.conditions,
            solubility,
            threshold: options.threshold.or_else(|| ThresholdSpec::default_for(analyte)),
            calibration_mode: None,
            cores: BTreeMap::new(),
        }
    }

    pub fn analyte(&self) -> Analyte {
        self.analyte
    }

    pub fn calibration_mode(&self) -> Option<&CalibrationMode> {
        self.calibration_mode.as_ref()
    }

    pub fn threshold(&self) -> Option<&ThresholdSpec> {
        self.threshold.as_ref()
    }

    /// Add (or replace) a core; it starts at `Loaded`.
    pub fn load_core(&mut self, core: Core) {
        let swi = SwiResolver::new(self.engine.clone(), self.analyte.interface_extremum(), &core);
        log::info!("{} core `{}` loaded with {} samples", self.analyte, core.name(), core.len());
        self.cores.insert(
            core.name().to_string(),
            CoreEntry {
                raw: core,
                stage: Stage::Loaded,
                swi,
                calibrated: None,
                thresholds: None,
            },
        );
    }

    pub fn core_names(&self) -> impl Iterator<Item = &str> {
        self.cores.keys().map(String::as_str)
    }

    pub fn stage(&self, core: &str) -> Result<Stage, ProfileError> {
        Ok(self.entry(core)?.stage)
    }

    pub fn raw_core(&self, core: &str) -> Result<&Core, ProfileError> {
        Ok(&self.entry(core)?.raw)
    }

    pub fn resolver(&self, core: &str) -> Result<&SwiResolver, ProfileError> {
        Ok(&self.entry(core)?.swi)
    }

    /// Corrected (depth re-based) profiles of `core`.
    pub fn corrected_core(&self, core: &str) -> Result<Core, ProfileError> {
        let entry = self.entry(core)?;
        Ok(entry.swi.corrected_core(&entry.raw))
    }

    pub fn calibrated(&self, core: &str) -> Result<Option<&CalibratedCore>, ProfileError> {
        Ok(self.entry(core)?.calibrated.as_ref())
    }

    pub fn thresholds(&self, core: &str) -> Result<Option<&CoreThresholds>, ProfileError> {
        Ok(self.entry(core)?.thresholds.as_ref())
    }

    pub fn resolve_swi(&mut self, core: &str) -> Result<CoreResolution, ProfileError> {
        let analyte = self.analyte;
        let entry = self.entry_mut(core)?;
        check(analyte, core, entry.stage, Stage::SwiResolved)?;
        let resolution = entry.swi.resolve()?;
        enter_swi_resolved(entry);
        Ok(resolution)
    }

    pub fn skip_swi(&mut self, core: &str) -> Result<CoreResolution, ProfileError> {
        let analyte = self.analyte;
        let entry = self.entry_mut(core)?;
        check(analyte, core, entry.stage, Stage::SwiResolved)?;
        let resolution = entry.swi.skip();
        enter_swi_resolved(entry);
        Ok(resolution)
    }

    pub fn crop(
        &mut self,
        core: &str,
        sample: &str,
        depth: f64,
    ) -> Result<Option<(f64, f64)>, ProfileError> {
        self.resolved_mut(core)?.swi.crop(sample, depth)
    }

    /// Both crop bounds at once, replacing any earlier ones.
    pub fn crop_range(
        &mut self,
        core: &str,
        sample: &str,
        min: f64,
        max: f64,
    ) -> Result<Option<(f64, f64)>, ProfileError> {
        self.resolved_mut(core)?.swi.crop_range(sample, min, max)
    }

    pub fn mark_outlier(&mut self, core: &str, sample: &str, depth: f64) -> Result<(), ProfileError> {
        self.resolved_mut(core)?.swi.mark_outlier(sample, depth)
    }

    /// Transient refit; nothing in the session changes.
    pub fn refit(&self, core: &str, sample: &str) -> Result<RefitOutcome, ProfileError> {
        let entry = self.entry(core)?;
        if entry.stage == Stage::Loaded {
            return Err(PreconditionError::NotResolved(core.to_string()).into());
        }
        entry.swi.refit(sample)
    }

    pub fn commit(&mut self, core: &str, sample: &str) -> Result<RefitOutcome, ProfileError> {
        let analyte = self.analyte;
        let entry = self.resolved_mut(core)?;
        check(analyte, core, entry.stage, Stage::SwiResolved)?;
        let outcome = entry.swi.commit(sample)?;
        enter_swi_resolved(entry);
        Ok(outcome)
    }

    pub fn reset_sample(&mut self, core: &str, sample: &str) -> Result<(), ProfileError> {
        let analyte = self.analyte;
        let entry = self.resolved_mut(core)?;
        check(analyte, core, entry.stage, Stage::SwiResolved)?;
        entry.swi.reset_sample(sample)?;
        enter_swi_resolved(entry);
        Ok(())
    }

    /// Fix the calibration strategy. Repeating the same mode is a no-op.
    pub fn set_calibration_mode(&mut self, mode: CalibrationMode) -> Result<(), ProfileError> {
        if let Some(current) = &self.calibration_mode {
            if *current != mode {
                return Err(PreconditionError::CalibrationModeFixed {
                    current: current.to_string(),
                    requested: mode.to_string(),
                }
                .into());
            }
            return Ok(());
        }
        log::info!("calibration mode set to {mode}");
        self.calibration_mode = Some(mode);
        Ok(())
    }

    pub fn calibrate(&mut self, core: &str) -> Result<&CalibratedCore, ProfileError> {
        let mode = self
            .calibration_mode
            .clone()
            .ok_or(PreconditionError::CalibrationModeUnset)?;
        let entry = self.entry(core)?;
        check(self.analyte, core, entry.stage, Stage::Calibrated)?;

        let reference = match &mode {
            CalibrationMode::OneCoreToAll { reference } => {
                let ref_entry = self
                    .cores
                    .get(reference)
                    .ok_or_else(|| PreconditionError::UnknownReferenceCore(reference.clone()))?;
                if ref_entry.stage == Stage::Loaded {
                    return Err(PreconditionError::NotResolved(reference.clone()).into());
                }
                Some(ref_entry.swi.corrected_core(&ref_entry.raw))
            }
            _ => None,
        };

        let corrected = entry.swi.corrected_core(&entry.raw);
        let resolver = CalibrationResolver::new(mode, Arc::clone(&self.solubility), self.conditions);
        let calibrated = resolver.calibrate(&corrected, reference.as_ref())?;

        let entry = self.entry_mut(core)?;
        entry.stage = Stage::Calibrated;
        entry.thresholds = None;
        Ok(entry.calibrated.insert(calibrated))
    }

    /// Compute the threshold table of a calibrated core.
    pub fn aggregate(&mut self, core: &str) -> Result<&CoreThresholds, ProfileError> {
        let analyte = self.analyte;
        let spec = self.threshold.clone();
        let entry = self.entry_mut(core)?;
        check(analyte, core, entry.stage, Stage::Aggregated)?;
        let (Some(spec), Some(calibrated)) = (spec, entry.calibrated.as_ref()) else {
            return Err(ProfileError::invalid(format!(
                "no threshold is defined for {analyte} profiles"
            )));
        };
        let visibility = entry
            .thresholds
            .as_ref()
            .map(|t| t.visibility().clone())
            .unwrap_or_default();
        let table = CoreThresholds::with_visibility(calibrated.core.clone(), spec, visibility)?;
        entry.stage = Stage::Aggregated;
        Ok(entry.thresholds.insert(table))
    }

    pub fn toggle_visibility(&mut self, core: &str, sample: &str) -> Result<Aggregate, ProfileError> {
        let table = self.aggregated_mut(core)?;
        table.toggle(sample).cloned()
    }

    pub fn set_threshold(&mut self, core: &str, spec: ThresholdSpec) -> Result<Aggregate, ProfileError> {
        let table = self.aggregated_mut(core)?;
        table.set_threshold(spec).cloned()
    }

    /// ΣS for every sample of a calibrated H2S core.
    pub fn total_sulfide(
        &self,
        core: &str,
        ph_cores: &[Core],
        table: &CorrelationTable,
    ) -> Result<Vec<SampleSulfide>, ProfileError> {
        if self.analyte != Analyte::H2s {
            return Err(ProfileError::invalid(format!(
                "total sulfide needs H2S profiles, this session holds {}",
                self.analyte
            )));
        }
        let calibrated = self
            .entry(core)?
            .calibrated
            .as_ref()
            .ok_or_else(|| ProfileError::invalid(format!("core `{core}` is not calibrated")))?;
        Ok(total_sulfide_for_core(&calibrated.core, ph_cores, table, self.conditions))
    }

    fn entry(&self, core: &str) -> Result<&CoreEntry, ProfileError> {
        self.cores
            .get(core)
            .ok_or_else(|| ProfileError::UnknownCore(core.to_string()))
    }

    fn entry_mut(&mut self, core: &str) -> Result<&mut CoreEntry, ProfileError> {
        self.cores
            .get_mut(core)
            .ok_or_else(|| ProfileError::UnknownCore(core.to_string()))
    }

    fn resolved_mut(&mut self, core: &str) -> Result<&mut CoreEntry, ProfileError> {
        let entry = self.entry_mut(core)?;
        if entry.stage == Stage::Loaded {
            return Err(PreconditionError::NotResolved(core.to_string()).into());
        }
        Ok(entry)
    }

    fn aggregated_mut(&mut self, core: &str) -> Result<&mut CoreThresholds, ProfileError> {
        let analyte = self.analyte;
        let entry = self.entry_mut(core)?;
        let stage = entry.stage;
        check(analyte, core, stage, Stage::Aggregated)?;
        entry.thresholds.as_mut().ok_or_else(|| {
            PreconditionError::InvalidTransition {
                analyte,
                core: core.to_string(),
                from: stage,
                to: Stage::Aggregated,
            }
            .into()
        })
    }
}

fn check(analyte: Analyte, core: &str, from: Stage, to: Stage) -> Result<(), ProfileError> {
    if analyte.allows(from, to) {
        Ok(())
    } else {
        Err(PreconditionError::InvalidTransition {
            analyte,
            core: core.to_string(),
            from,
            to,
        }
        .into())
    }
}

fn enter_swi_resolved(entry: &mut CoreEntry) {
    if entry.stage != Stage::SwiResolved {
        log::info!("core `{}`: {:?} -> {:?}", entry.raw.name(), entry.stage, Stage::SwiResolved);
    }
    entry.stage = Stage::SwiResolved;
    entry.calibrated = None;
    entry.thresholds = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic_core;
    use approx::assert_relative_eq;

    fn o2_session() -> AnalysisSession {
        let mut session = AnalysisSession::new(Analyte::O2, SessionOptions::default());
        session.load_core(synthetic_core("C1", Analyte::O2, 3, 200.0, 30.0, 5, None).unwrap());
        session.load_core(synthetic_core("C2", Analyte::O2, 2, -100.0, 30.0, 6, None).unwrap());
        session
    }

    #[test]
    fn full_o2_pipeline() {
        let mut session = o2_session();
        session.resolve_swi("C1").unwrap();
        session.set_calibration_mode(CalibrationMode::PerCore).unwrap();
        let calibrated = session.calibrate("C1").unwrap();
        let (lo, hi) = calibrated.core.signal_bounds().unwrap();
        assert_relative_eq!(lo, 0.0);
        assert_relative_eq!(hi, GarciaGordon.saturation(15.0, 35.0), epsilon = 1e-9);

        let table = session.aggregate("C1").unwrap();
        assert_eq!(table.aggregate().n_included, 3);
        assert_eq!(session.stage("C1").unwrap(), Stage::Aggregated);

        let before = session.thresholds("C1").unwrap().unwrap().aggregate().clone();
        session.toggle_visibility("C1", "C1-02").unwrap();
        let after = session.toggle_visibility("C1", "C1-02").unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn commit_moves_core_back_and_drops_calibration() {
        let mut session = o2_session();
        session.resolve_swi("C1").unwrap();
        session.set_calibration_mode(CalibrationMode::PerCore).unwrap();
        session.calibrate("C1").unwrap();
        session.aggregate("C1").unwrap();

        session.crop("C1", "C1-01", -1500.0).unwrap();
        session.crop("C1", "C1-01", 1500.0).unwrap();
        session.commit("C1", "C1-01").unwrap();
        assert_eq!(session.stage("C1").unwrap(), Stage::SwiResolved);
        assert!(session.calibrated("C1").unwrap().is_none());
        assert!(session.thresholds("C1").unwrap().is_none());
        assert!(matches!(
            session.toggle_visibility("C1", "C1-01"),
            Err(ProfileError::Precondition(PreconditionError::InvalidTransition { .. }))
        ));

        // Recalibration sees the committed (cropped) profile.
        let calibrated = session.calibrate("C1").unwrap();
        assert_eq!(calibrated.core.profile("C1-01").unwrap().len(), 61);
    }

    #[test]
    fn calibration_before_resolution_is_rejected() {
        let mut session = o2_session();
        session.set_calibration_mode(CalibrationMode::PerCore).unwrap();
        let err = session.calibrate("C1").unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Precondition(PreconditionError::InvalidTransition {
                from: Stage::Loaded,
                to: Stage::Calibrated,
                ..
            })
        ));
    }

    #[test]
    fn calibration_mode_is_fixed_once_set() {
        let mut session = o2_session();
        session.resolve_swi("C1").unwrap();
        assert_eq!(
            session.calibrate("C1").unwrap_err(),
            ProfileError::from(PreconditionError::CalibrationModeUnset)
        );
        session.set_calibration_mode(CalibrationMode::PerCore).unwrap();
        session.set_calibration_mode(CalibrationMode::PerCore).unwrap();
        let err = session.set_calibration_mode(CalibrationMode::FromFile).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Precondition(PreconditionError::CalibrationModeFixed { .. })
        ));
        assert_eq!(session.calibration_mode(), Some(&CalibrationMode::PerCore));
    }

    #[test]
    fn reference_core_must_be_resolved() {
        let mut session = o2_session();
        session.resolve_swi("C2").unwrap();
        session
            .set_calibration_mode(CalibrationMode::OneCoreToAll {
                reference: "C1".into(),
            })
            .unwrap();
        assert!(matches!(
            session.calibrate("C2"),
            Err(ProfileError::Precondition(PreconditionError::NotResolved(_)))
        ));

        session.skip_swi("C1").unwrap();
        session.calibrate("C2").unwrap();
        let reference_bounds = session.corrected_core("C1").unwrap().signal_bounds().unwrap();
        let factor = session.calibrated("C2").unwrap().unwrap().factor.unwrap();
        assert_eq!((factor.min_signal, factor.max_signal), reference_bounds);
    }

    #[test]
    fn ph_stops_after_interface_resolution() {
        let mut session = AnalysisSession::new(Analyte::Ph, SessionOptions::default());
        session.load_core(synthetic_core("P1", Analyte::Ph, 2, 0.0, 20.0, 8, None).unwrap());
        session.resolve_swi("P1").unwrap();
        session.resolve_swi("P1").unwrap();
        session.set_calibration_mode(CalibrationMode::PerCore).unwrap();
        assert!(matches!(
            session.calibrate("P1"),
            Err(ProfileError::Precondition(PreconditionError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn operations_on_unknown_core() {
        let mut session = o2_session();
        assert_eq!(
            session.resolve_swi("nope").unwrap_err(),
            ProfileError::UnknownCore("nope".into())
        );
        assert!(matches!(
            session.crop("C1", "C1-01", 0.0),
            Err(ProfileError::Precondition(PreconditionError::NotResolved(_)))
        ));
    }
}
