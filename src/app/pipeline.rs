//! Shared pipeline logic used by the `run`, `drift` and `demo` commands.
//!
//! load -> interface resolution -> calibration -> threshold aggregation [-> ΣS]
//!
//! EP drift runs on its own: deployment grouping -> regression across packages.

use crate::calibration::CorrelationTable;
use std::collections::BTreeMap;

use crate::domain::{Analyte, CalibrationMode, Core, RegressionKind, Stage};
use crate::drift::DriftCorrector;
use crate::error::AppError;
use crate::io::ingest::LoadedProfiles;
use crate::report::RunReport;
use crate::session::{AnalysisSession, SessionOptions};

/// Everything `run_analysis` needs besides the data.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub session: SessionOptions,
    /// `None` skips calibration and aggregation.
    pub calibration: Option<CalibrationMode>,
    /// Measured-depth window committed on every sample after resolution.
    pub crop: Option<(f64, f64)>,
}

/// pH profiles and the H2S → pH sample links for total sulfide.
#[derive(Debug, Clone)]
pub struct SulfideInputs {
    pub ph: LoadedProfiles,
    pub table: CorrelationTable,
}

/// All computed outputs of one analysis run.
pub struct RunOutput {
    pub loaded: LoadedProfiles,
    pub session: AnalysisSession,
    pub report: RunReport,
}

impl RunOutput {
    /// Calibrated cores where available, interface-corrected cores otherwise.
    /// Cores whose interface could not be resolved are left out.
    pub fn exported_cores(&self) -> Result<Vec<Core>, AppError> {
        let mut cores = Vec::new();
        for name in self.session.core_names() {
            if self.session.stage(name)? == Stage::Loaded {
                continue;
            }
            let core = match self.session.calibrated(name)? {
                Some(calibrated) => calibrated.core.clone(),
                None => self.session.corrected_core(name)?,
            };
            cores.push(core);
        }
        Ok(cores)
    }
}

/// Execute the per-analyte pipeline on every loaded core.
pub fn run_analysis(
    loaded: LoadedProfiles,
    analyte: Analyte,
    settings: &RunSettings,
    sulfide: Option<SulfideInputs>,
) -> Result<RunOutput, AppError> {
    let mut session = AnalysisSession::new(analyte, settings.session.clone());
    for core in &loaded.cores {
        session.load_core(core.clone());
    }
    let names: Vec<String> = session.core_names().map(str::to_string).collect();

    // A core whose interface cannot be resolved is reported and left behind.
    let mut failures: BTreeMap<String, String> = BTreeMap::new();
    let mut first_error = None;
    for name in &names {
        match session.resolve_swi(name) {
            Ok(resolution) => {
                log::info!("core `{name}`: interface at {:.2}", resolution.interface_depth)
            }
            Err(err) => {
                log::warn!("core `{name}`: interface not resolved: {err}");
                failures.insert(name.clone(), err.to_string());
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error.filter(|_| failures.len() == names.len()) {
        return Err(err.into());
    }
    let resolved: Vec<&String> = names.iter().filter(|n| !failures.contains_key(*n)).collect();

    if let Some(crop) = settings.crop {
        for name in &resolved {
            crop_core(&mut session, name, crop)?;
        }
    }

    if let Some(mode) = settings.calibration.as_ref().filter(|_| analyte.is_calibrated()) {
        session.set_calibration_mode(mode.clone())?;
        for name in &resolved {
            session.calibrate(name)?;
            if session.threshold().is_some() {
                session.aggregate(name)?;
            }
        }
    }

    let mut report = RunReport::from_session(&session)?;
    for core_report in &mut report.cores {
        core_report.failure = failures.get(&core_report.resolution.core).cloned();
    }

    if let Some(inputs) = sulfide {
        let ph_cores = corrected_ph_cores(&inputs.ph.cores, &settings.session)?;
        for (name, core_report) in names.iter().zip(report.cores.iter_mut()) {
            if core_report.failure.is_none() {
                core_report.sulfide = session.total_sulfide(name, &ph_cores, &inputs.table)?;
            }
        }
    }

    Ok(RunOutput {
        loaded,
        session,
        report,
    })
}

/// Crop every sample of `core` to `(min, max)` and commit the refit.
/// A sample whose cropped refit fails keeps its resolved state.
fn crop_core(session: &mut AnalysisSession, core: &str, (min, max): (f64, f64)) -> Result<(), AppError> {
    let samples: Vec<String> = session
        .raw_core(core)?
        .profiles()
        .map(|p| p.sample().to_string())
        .collect();
    for sample in &samples {
        session.crop_range(core, sample, min, max)?;
        if let Err(err) = session.commit(core, sample) {
            log::warn!("core `{core}` sample `{sample}`: crop {min}..{max} not applied: {err}");
            session.reset_sample(core, sample)?;
        }
    }
    Ok(())
}

/// pH cores on the interface-relative depth axis, so they line up with H2S.
/// A pH core without a resolvable interface is dropped, which skips the
/// total sulfide of the H2S samples linked to it.
fn corrected_ph_cores(cores: &[Core], options: &SessionOptions) -> Result<Vec<Core>, AppError> {
    let mut session = AnalysisSession::new(
        Analyte::Ph,
        SessionOptions {
            fit: options.fit.clone(),
            ..SessionOptions::default()
        },
    );
    for core in cores {
        session.load_core(core.clone());
    }
    let names: Vec<String> = session.core_names().map(str::to_string).collect();
    let mut corrected = Vec::with_capacity(names.len());
    for name in &names {
        match session.resolve_swi(name) {
            Ok(_) => corrected.push(session.corrected_core(name)?),
            Err(err) => log::warn!("pH core `{name}`: interface not resolved: {err}"),
        }
    }
    Ok(corrected)
}

/// Outputs of a drift run.
#[derive(Debug, Clone)]
pub struct DriftOutput {
    pub corrector: DriftCorrector,
    /// Input cores with each package's correction factor subtracted.
    pub corrected: Vec<Core>,
    pub report: RunReport,
}

/// Group EP cores into deployment packages, fit the drift regression and
/// correct every package.
pub fn run_drift(cores: &[Core], kind: RegressionKind, slot_minutes: i64) -> Result<DriftOutput, AppError> {
    let mut corrector = DriftCorrector::from_cores(cores, slot_minutes)?;
    let fits: Vec<_> = corrector
        .fit_all(kind)?
        .iter()
        .filter_map(|group| group.fit().cloned())
        .collect();
    log::info!("drift: {} packages fitted ({kind:?})", fits.len());
    let corrected = corrector.corrected_cores(cores)?;

    Ok(DriftOutput {
        corrector,
        corrected,
        report: RunReport {
            analyte: Analyte::Ep,
            calibration_mode: None,
            threshold_label: None,
            cores: Vec::new(),
            drift: fits,
        },
    })
}
