//! Interface resolution for one core.
//!
//! A [`SwiResolver`] owns three views of every sample:
//!
//! - `raw`: the profile as loaded; never modified
//! - `adjusted`: the series fits run on; replaced only by [`SwiResolver::commit`]
//! - `corrected`: `adjusted` re-based so the interface sits at depth 0
//!
//! Interactive revision (crop, outlier removal, refit) works on a per-sample
//! scratch state that is cleared on commit and reset.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Core, Extremum, FitQuality, Profile};
use crate::error::{PreconditionError, ProfileError};
use crate::fit::{CurveFitEngine, FitResult};

/// How a sample's current interface estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleFitStatus {
    /// Not fitted yet.
    Pending,
    /// The latest fit converged.
    Fitted,
    /// The latest fit failed; the previous fit is still in use.
    RetainedPrevious,
    /// The fit failed and there is nothing to fall back to.
    NeedsReview,
    /// Interface detection was skipped for the whole core.
    Skipped,
}

impl SampleFitStatus {
    pub fn label(self) -> &'static str {
        match self {
            SampleFitStatus::Pending => "pending",
            SampleFitStatus::Fitted => "fitted",
            SampleFitStatus::RetainedPrevious => "retained previous",
            SampleFitStatus::NeedsReview => "needs review",
            SampleFitStatus::Skipped => "skipped",
        }
    }
}

/// Crop window built from clicked depths; only the two most recent are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CropWindow {
    bounds: VecDeque<f64>,
}

impl CropWindow {
    pub fn push(&mut self, depth: f64) {
        if self.bounds.len() == 2 {
            self.bounds.pop_front();
        }
        self.bounds.push_back(depth);
    }

    /// `(min, max)` once two bounds are set.
    pub fn range(&self) -> Option<(f64, f64)> {
        match (self.bounds.front(), self.bounds.back()) {
            (Some(&a), Some(&b)) if self.bounds.len() == 2 => Some((a.min(b), a.max(b))),
            _ => None,
        }
    }

    pub fn bounds(&self) -> impl Iterator<Item = f64> + '_ {
        self.bounds.iter().copied()
    }

    pub fn clear(&mut self) {
        self.bounds.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// Result of a transient refit. Nothing stored in the resolver changes.
#[derive(Debug, Clone, PartialEq)]
pub struct RefitOutcome {
    pub sample: String,
    pub fit: FitResult,
    /// Interface estimate in the adjusted depth coordinate.
    pub interface_depth: f64,
    /// Adjusted profile re-based with `interface_depth`.
    pub corrected: Profile,
    /// Series the fit was run on (crop and outliers applied).
    pub filtered: Profile,
}

/// Per-sample summary for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResolution {
    pub sample: String,
    pub status: SampleFitStatus,
    pub interface_depth: Option<f64>,
    /// Offset subtracted from the adjusted depths.
    pub shift: f64,
    pub reduced_chi_square: Option<f64>,
    pub quality: Option<FitQuality>,
}

/// Per-core summary for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreResolution {
    pub core: String,
    /// Core interface `d0`: mean of the usable per-sample estimates.
    pub interface_depth: f64,
    pub samples: Vec<SampleResolution>,
}

#[derive(Debug, Clone)]
struct SampleState {
    raw: Profile,
    adjusted: Profile,
    fit: Option<FitResult>,
    estimate: Option<f64>,
    status: SampleFitStatus,
    shift: f64,
    // Snapshot of the last `resolve`, used by `reset_sample`.
    resolved_fit: Option<FitResult>,
    resolved_estimate: Option<f64>,
    resolved_status: SampleFitStatus,
    crop: CropWindow,
    outliers: Vec<f64>,
}

impl SampleState {
    fn new(raw: Profile) -> Self {
        Self {
            adjusted: raw.clone(),
            raw,
            fit: None,
            estimate: None,
            status: SampleFitStatus::Pending,
            shift: 0.0,
            resolved_fit: None,
            resolved_estimate: None,
            resolved_status: SampleFitStatus::Pending,
            crop: CropWindow::default(),
            outliers: Vec::new(),
        }
    }

    /// Adjusted series with the crop window and outlier marks applied.
    ///
    /// Marks resolve to their nearest point on the whole adjusted series, so a
    /// mark outside the crop window never removes a point inside it.
    fn filtered(&self) -> Result<Profile, ProfileError> {
        let marked: BTreeSet<usize> = self
            .outliers
            .iter()
            .map(|&depth| self.adjusted.nearest_index(depth))
            .collect();
        let (lo, hi) = self.crop.range().unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
        self.adjusted
            .retained(|i, d| !marked.contains(&i) && d >= lo && d <= hi)
    }

    fn resolution(&self) -> SampleResolution {
        SampleResolution {
            sample: self.raw.sample().to_string(),
            status: self.status,
            interface_depth: self.estimate,
            shift: self.shift,
            reduced_chi_square: self.fit.as_ref().map(FitResult::reduced_chi_square),
            quality: self.fit.as_ref().map(FitResult::quality),
        }
    }
}

/// Locates the sediment–water interface of one core and keeps the corrected
/// depth coordinate.
#[derive(Debug, Clone)]
pub struct SwiResolver {
    engine: CurveFitEngine,
    extremum: Extremum,
    core: String,
    interface_depth: f64,
    samples: BTreeMap<String, SampleState>,
}

impl SwiResolver {
    pub fn new(engine: CurveFitEngine, extremum: Extremum, core: &Core) -> Self {
        let samples = core
            .profiles()
            .map(|p| (p.sample().to_string(), SampleState::new(p.clone())))
            .collect();
        Self {
            engine,
            extremum,
            core: core.name().to_string(),
            interface_depth: 0.0,
            samples,
        }
    }

    pub fn core_name(&self) -> &str {
        &self.core
    }

    pub fn interface_depth(&self) -> f64 {
        self.interface_depth
    }

    /// Fit every sample and shift the whole core by the mean interface estimate.
    pub fn resolve(&mut self) -> Result<CoreResolution, ProfileError> {
        let engine = &self.engine;
        let outcomes: Vec<(String, Result<FitResult, ProfileError>)> = self
            .samples
            .par_iter()
            .map(|(id, state)| (id.clone(), engine.fit(&state.adjusted, None)))
            .collect();

        let mut first_error = None;
        for (id, outcome) in outcomes {
            let Some(state) = self.samples.get_mut(&id) else {
                continue;
            };
            match outcome {
                Ok(fit) => {
                    state.estimate = Some(fit.interface_depth(self.extremum));
                    state.fit = Some(fit);
                    state.status = SampleFitStatus::Fitted;
                }
                Err(err) => {
                    if state.fit.is_some() && state.estimate.is_some() {
                        log::warn!("core `{}` sample `{id}`: {err}; keeping previous fit", self.core);
                        state.status = SampleFitStatus::RetainedPrevious;
                    } else {
                        log::warn!("core `{}` sample `{id}`: {err}; flagged for review", self.core);
                        state.status = SampleFitStatus::NeedsReview;
                        state.estimate = None;
                        state.fit = None;
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        let estimates: Vec<f64> = self.samples.values().filter_map(|s| s.estimate).collect();
        if estimates.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                ProfileError::invalid(format!("core `{}` has no samples", self.core))
            }));
        }
        self.interface_depth = estimates.iter().sum::<f64>() / estimates.len() as f64;

        for state in self.samples.values_mut() {
            state.shift = self.interface_depth;
            state.resolved_fit = state.fit.clone();
            state.resolved_estimate = state.estimate;
            state.resolved_status = state.status;
            state.crop.clear();
            state.outliers.clear();
        }

        log::info!(
            "core `{}`: interface at {:.3} from {} of {} samples",
            self.core,
            self.interface_depth,
            estimates.len(),
            self.samples.len()
        );
        Ok(self.resolution())
    }

    /// Leave the depth coordinate untouched.
    pub fn skip(&mut self) -> CoreResolution {
        self.interface_depth = 0.0;
        for state in self.samples.values_mut() {
            state.fit = None;
            state.estimate = None;
            state.status = SampleFitStatus::Skipped;
            state.shift = 0.0;
            state.resolved_fit = None;
            state.resolved_estimate = None;
            state.resolved_status = SampleFitStatus::Skipped;
            state.crop.clear();
            state.outliers.clear();
        }
        log::info!("core `{}`: interface detection skipped", self.core);
        self.resolution()
    }

    /// Add a crop bound. Returns the active `(min, max)` window, if any.
    pub fn crop(&mut self, sample: &str, depth: f64) -> Result<Option<(f64, f64)>, ProfileError> {
        let state = self.state_mut(sample)?;
        state.crop.push(depth);
        Ok(state.crop.range())
    }

    pub fn crop_range(
        &mut self,
        sample: &str,
        a: f64,
        b: f64,
    ) -> Result<Option<(f64, f64)>, ProfileError> {
        self.crop(sample, a)?;
        self.crop(sample, b)
    }

    pub fn crop_window(&self, sample: &str) -> Result<&CropWindow, ProfileError> {
        Ok(&self.state(sample)?.crop)
    }

    pub fn mark_outlier(&mut self, sample: &str, depth: f64) -> Result<(), ProfileError> {
        self.state_mut(sample)?.outliers.push(depth);
        Ok(())
    }

    pub fn outliers(&self, sample: &str) -> Result<&[f64], ProfileError> {
        Ok(&self.state(sample)?.outliers)
    }

    /// Fit the crop/outlier-filtered series without storing anything.
    ///
    /// The fit is seeded with the current fit, so calling this repeatedly
    /// with the same crop and outliers gives the same outcome.
    pub fn refit(&self, sample: &str) -> Result<RefitOutcome, ProfileError> {
        let state = self.state(sample)?;
        if state.status == SampleFitStatus::Pending || state.status == SampleFitStatus::Skipped {
            return Err(PreconditionError::NotResolved(sample.to_string()).into());
        }
        let filtered = state.filtered()?;
        let fit = self
            .engine
            .fit(&filtered, state.fit.as_ref().map(FitResult::params))?;
        let interface_depth = fit.interface_depth(self.extremum);
        log::debug!(
            "core `{}` sample `{sample}`: refit on {} of {} points, interface {:.3}",
            self.core,
            filtered.len(),
            state.adjusted.len(),
            interface_depth
        );
        Ok(RefitOutcome {
            sample: sample.to_string(),
            corrected: state.adjusted.shifted(interface_depth),
            fit,
            interface_depth,
            filtered,
        })
    }

    /// Refit and keep the result: the filtered series becomes the adjusted
    /// profile and the sample is re-based on its own interface estimate.
    pub fn commit(&mut self, sample: &str) -> Result<RefitOutcome, ProfileError> {
        let outcome = self.refit(sample)?;
        let state = self.state_mut(sample)?;
        state.adjusted = outcome.filtered.clone();
        state.fit = Some(outcome.fit.clone());
        state.estimate = Some(outcome.interface_depth);
        state.status = SampleFitStatus::Fitted;
        state.shift = outcome.interface_depth;
        state.crop.clear();
        state.outliers.clear();
        log::info!(
            "core `{}` sample `{sample}`: committed {} points, interface {:.3}",
            self.core,
            outcome.filtered.len(),
            outcome.interface_depth
        );
        Ok(outcome)
    }

    /// Back to the raw series and the state of the last `resolve`.
    pub fn reset_sample(&mut self, sample: &str) -> Result<(), ProfileError> {
        let d0 = self.interface_depth;
        let state = self.state_mut(sample)?;
        state.adjusted = state.raw.clone();
        state.fit = state.resolved_fit.clone();
        state.estimate = state.resolved_estimate;
        state.status = state.resolved_status;
        state.shift = d0;
        state.crop.clear();
        state.outliers.clear();
        Ok(())
    }

    pub fn raw(&self, sample: &str) -> Result<&Profile, ProfileError> {
        Ok(&self.state(sample)?.raw)
    }

    pub fn adjusted(&self, sample: &str) -> Result<&Profile, ProfileError> {
        Ok(&self.state(sample)?.adjusted)
    }

    pub fn corrected(&self, sample: &str) -> Result<Profile, ProfileError> {
        let state = self.state(sample)?;
        Ok(state.adjusted.shifted(state.shift))
    }

    pub fn fit(&self, sample: &str) -> Result<Option<&FitResult>, ProfileError> {
        Ok(self.state(sample)?.fit.as_ref())
    }

    pub fn status(&self, sample: &str) -> Result<SampleFitStatus, ProfileError> {
        Ok(self.state(sample)?.status)
    }

    /// All corrected profiles as a core (metadata is taken from `source`).
    pub fn corrected_core(&self, source: &Core) -> Core {
        let mut core = Core::new(self.core.clone()).with_metadata(source.metadata().clone());
        for state in self.samples.values() {
            core.insert(state.adjusted.shifted(state.shift));
        }
        core
    }

    pub fn resolution(&self) -> CoreResolution {
        CoreResolution {
            core: self.core.clone(),
            interface_depth: self.interface_depth,
            samples: self.samples.values().map(SampleState::resolution).collect(),
        }
    }

    fn state(&self, sample: &str) -> Result<&SampleState, ProfileError> {
        self.samples
            .get(sample)
            .ok_or_else(|| ProfileError::UnknownSample(sample.to_string()))
    }

    fn state_mut(&mut self, sample: &str) -> Result<&mut SampleState, ProfileError> {
        self.samples
            .get_mut(sample)
            .ok_or_else(|| ProfileError::UnknownSample(sample.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{synthetic_core, synthetic_profile, SyntheticSpec};
    use crate::domain::Analyte;
    use crate::fit::FitOptions;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn o2_core(interface: f64) -> Core {
        synthetic_core("C1", Analyte::O2, 3, interface, 40.0, 17, None).unwrap()
    }

    fn resolver(core: &Core) -> SwiResolver {
        SwiResolver::new(CurveFitEngine::default(), Extremum::Minimum, core)
    }

    #[test]
    fn resolve_shifts_core_by_mean_interface() {
        let core = o2_core(300.0);
        let mut swi = resolver(&core);
        let resolution = swi.resolve().unwrap();

        let estimates: Vec<f64> = resolution
            .samples
            .iter()
            .map(|s| s.interface_depth.unwrap())
            .collect();
        let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
        assert_relative_eq!(resolution.interface_depth, mean);
        // Depth range is 6000; 1% tolerance plus the ±40 jitter.
        assert!((mean - 300.0).abs() < 100.0, "d0={mean}");

        let d0 = resolution.interface_depth;
        for id in core.sample_ids() {
            let raw = swi.raw(id).unwrap();
            let corrected = swi.corrected(id).unwrap();
            for (old, new) in raw.depths().iter().zip(corrected.depths()) {
                assert_relative_eq!(*new, old - d0);
            }
        }
    }

    #[test]
    fn point_at_interface_maps_to_zero() {
        let profile = Profile::new("s", vec![-100.0, 0.0, 137.5, 200.0], vec![1.0; 4]).unwrap();
        let shifted = profile.shifted(137.5);
        assert_eq!(shifted.depths()[2], 0.0);
    }

    #[test]
    fn crop_keeps_last_two_bounds() {
        let mut window = CropWindow::default();
        window.push(100.0);
        assert_eq!(window.range(), None);
        window.push(-500.0);
        assert_eq!(window.range(), Some((-500.0, 100.0)));
        window.push(800.0);
        assert_eq!(window.range(), Some((-500.0, 800.0)));
    }

    #[test]
    fn refit_uses_only_cropped_points() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        swi.resolve().unwrap();

        swi.crop_range("C1-01", -600.0, 600.0).unwrap();
        let outcome = swi.refit("C1-01").unwrap();
        assert!(outcome.fit.depths().iter().all(|d| (-600.0..=600.0).contains(d)));
        assert_eq!(outcome.fit.n_points(), 25);
        // Nothing stored changed.
        assert_eq!(swi.adjusted("C1-01").unwrap(), swi.raw("C1-01").unwrap());
    }

    #[test]
    fn refit_is_repeatable() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        swi.resolve().unwrap();
        swi.crop_range("C1-02", -1000.0, 1000.0).unwrap();
        swi.mark_outlier("C1-02", 210.0).unwrap();

        let first = swi.refit("C1-02").unwrap();
        let second = swi.refit("C1-02").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.filtered.len(), 40);
    }

    #[test]
    fn outlier_removes_nearest_point() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        swi.resolve().unwrap();
        swi.mark_outlier("C1-01", 26.0).unwrap();
        let outcome = swi.refit("C1-01").unwrap();
        assert!(!outcome.filtered.depths().contains(&50.0));
        assert!(outcome.filtered.depths().contains(&0.0));
    }

    #[test]
    fn outlier_outside_crop_window_keeps_window_points() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        swi.resolve().unwrap();
        swi.crop_range("C1-01", -600.0, 600.0).unwrap();
        swi.mark_outlier("C1-01", 2500.0).unwrap();

        let outcome = swi.refit("C1-01").unwrap();
        assert_eq!(outcome.filtered.len(), 25);
        assert!(outcome.filtered.depths().contains(&600.0));

        // Same point marked twice is removed once.
        swi.mark_outlier("C1-01", 590.0).unwrap();
        swi.mark_outlier("C1-01", 610.0).unwrap();
        let outcome = swi.refit("C1-01").unwrap();
        assert_eq!(outcome.filtered.len(), 24);
        assert!(!outcome.filtered.depths().contains(&600.0));
    }

    #[test]
    fn commit_then_reset_restores_raw_series() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        let resolution = swi.resolve().unwrap();
        let before = swi.corrected("C1-03").unwrap();

        swi.crop_range("C1-03", -800.0, 800.0).unwrap();
        let outcome = swi.commit("C1-03").unwrap();
        assert_eq!(swi.adjusted("C1-03").unwrap(), &outcome.filtered);
        assert!(swi.crop_window("C1-03").unwrap().is_empty());
        assert_relative_eq!(
            swi.corrected("C1-03").unwrap().depths()[0],
            -800.0 - outcome.interface_depth
        );

        swi.reset_sample("C1-03").unwrap();
        assert_eq!(swi.adjusted("C1-03").unwrap(), core.profile("C1-03").unwrap());
        assert_eq!(swi.corrected("C1-03").unwrap(), before);
        assert_relative_eq!(swi.interface_depth(), resolution.interface_depth);
    }

    #[test]
    fn diverging_sample_is_flagged_and_left_out() {
        let mut core = o2_core(0.0);
        let flat = Profile::new("C1-99", vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 1.0]).unwrap();
        core.insert(flat);
        let mut swi = resolver(&core);
        let resolution = swi.resolve().unwrap();

        let flagged = resolution.samples.iter().find(|s| s.sample == "C1-99").unwrap();
        assert_eq!(flagged.status, SampleFitStatus::NeedsReview);
        assert_eq!(flagged.interface_depth, None);
        assert!(matches!(swi.refit("C1-99"), Err(ProfileError::InvalidInput(_))));
        // d0 comes from the three fitted samples only.
        let fitted: Vec<f64> = resolution.samples.iter().filter_map(|s| s.interface_depth).collect();
        assert_eq!(fitted.len(), 3);
        assert_relative_eq!(resolution.interface_depth, fitted.iter().sum::<f64>() / 3.0);
    }

    #[test]
    fn failed_refit_retains_previous_on_resolve() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        swi.resolve().unwrap();
        let previous = swi.fit("C1-01").unwrap().cloned();

        swi.engine = CurveFitEngine::new(FitOptions {
            max_iterations: 0,
            ..FitOptions::default()
        });
        let resolution = swi.resolve().unwrap();
        assert!(resolution
            .samples
            .iter()
            .all(|s| s.status == SampleFitStatus::RetainedPrevious));
        assert_eq!(swi.fit("C1-01").unwrap().cloned(), previous);
    }

    #[test]
    fn all_samples_failing_propagates_error() {
        let spec = SyntheticSpec::for_analyte(Analyte::O2, "only", 0.0, 3);
        let core = Core::new("C9").with_profile(synthetic_profile(&spec).unwrap());
        let mut swi = SwiResolver::new(
            CurveFitEngine::new(FitOptions {
                max_iterations: 0,
                ..FitOptions::default()
            }),
            Extremum::Minimum,
            &core,
        );
        assert!(matches!(swi.resolve(), Err(ProfileError::FitDivergence { .. })));
    }

    #[test]
    fn skip_leaves_depths_untouched() {
        let core = o2_core(250.0);
        let mut swi = resolver(&core);
        swi.skip();
        assert_eq!(swi.corrected_core(&core), core);
        assert!(swi.refit("C1-01").is_err());
    }

    #[test]
    fn unknown_sample_is_reported() {
        let core = o2_core(0.0);
        let mut swi = resolver(&core);
        assert_eq!(
            swi.crop("nope", 1.0).unwrap_err(),
            ProfileError::UnknownSample("nope".into())
        );
    }

    proptest! {
        #[test]
        fn crop_window_is_last_two_clicks(clicks in prop::collection::vec(-1e4f64..1e4, 2..12)) {
            let mut window = CropWindow::default();
            for &c in &clicks {
                window.push(c);
            }
            let a = clicks[clicks.len() - 2];
            let b = clicks[clicks.len() - 1];
            prop_assert_eq!(window.range(), Some((a.min(b), a.max(b))));
            prop_assert_eq!(window.bounds().count(), 2);
        }
    }
}
