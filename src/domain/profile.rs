//! Depth profiles and cores.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Linear calibration embedded in the loaded data: `c = intercept + slope * signal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCoefficients {
    pub slope: f64,
    pub intercept: f64,
}

/// One sample's measurement: `(depth, signal)` pairs with strictly increasing depth.
///
/// Deserialization goes through [`Profile::new`], so a read-back profile is
/// validated like a loaded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileRecord")]
pub struct Profile {
    sample: String,
    depths: Vec<f64>,
    signal: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    calibration: Option<CalibrationCoefficients>,
}

#[derive(Deserialize)]
struct ProfileRecord {
    sample: String,
    depths: Vec<f64>,
    signal: Vec<f64>,
    #[serde(default)]
    calibration: Option<CalibrationCoefficients>,
}

impl TryFrom<ProfileRecord> for Profile {
    type Error = ProfileError;

    fn try_from(record: ProfileRecord) -> Result<Self, Self::Error> {
        let profile = Profile::new(record.sample, record.depths, record.signal)?;
        Ok(match record.calibration {
            Some(c) => profile.with_calibration(c),
            None => profile,
        })
    }
}

impl Profile {
    /// Build a profile, validating lengths, finiteness and depth ordering.
    pub fn new(
        sample: impl Into<String>,
        depths: Vec<f64>,
        signal: Vec<f64>,
    ) -> Result<Self, ProfileError> {
        let sample = sample.into();
        if depths.len() != signal.len() {
            return Err(ProfileError::invalid(format!(
                "sample `{sample}`: {} depths but {} signal values",
                depths.len(),
                signal.len()
            )));
        }
        if depths.is_empty() {
            return Err(ProfileError::invalid(format!("sample `{sample}` has no points")));
        }
        if depths.iter().chain(signal.iter()).any(|v| !v.is_finite()) {
            return Err(ProfileError::invalid(format!(
                "sample `{sample}` contains non-finite values"
            )));
        }
        if depths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ProfileError::invalid(format!(
                "sample `{sample}`: depth must be strictly increasing"
            )));
        }
        Ok(Self {
            sample,
            depths,
            signal,
            calibration: None,
        })
    }

    pub fn with_calibration(mut self, calibration: CalibrationCoefficients) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn depths(&self) -> &[f64] {
        &self.depths
    }

    pub fn signal(&self) -> &[f64] {
        &self.signal
    }

    pub fn calibration(&self) -> Option<CalibrationCoefficients> {
        self.calibration
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.depths.iter().copied().zip(self.signal.iter().copied())
    }

    /// `(shallowest, deepest)` depth.
    pub fn depth_range(&self) -> (f64, f64) {
        (self.depths[0], self.depths[self.depths.len() - 1])
    }

    /// `(min, max)` signal.
    pub fn signal_bounds(&self) -> (f64, f64) {
        self.signal
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    pub fn mean_signal(&self) -> f64 {
        self.signal.iter().sum::<f64>() / self.signal.len() as f64
    }

    /// Re-base the depth coordinate: every depth becomes `depth - d0`.
    pub fn shifted(&self, d0: f64) -> Profile {
        Profile {
            sample: self.sample.clone(),
            depths: self.depths.iter().map(|d| d - d0).collect(),
            signal: self.signal.clone(),
            calibration: self.calibration,
        }
    }

    /// Same depth domain, new signal values.
    pub fn with_signal(&self, signal: Vec<f64>) -> Result<Profile, ProfileError> {
        if signal.len() != self.depths.len() {
            return Err(ProfileError::invalid(format!(
                "sample `{}`: replacement signal has {} values for {} depths",
                self.sample,
                signal.len(),
                self.depths.len()
            )));
        }
        Profile::new(self.sample.clone(), self.depths.clone(), signal)
            .map(|p| Profile { calibration: self.calibration, ..p })
    }

    /// Keep only points with `lo <= depth <= hi`.
    pub fn restricted(&self, lo: f64, hi: f64) -> Result<Profile, ProfileError> {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.retained(|_, d| d >= lo && d <= hi)
    }

    /// Keep the points for which `keep(index, depth)` holds.
    pub fn retained(&self, mut keep: impl FnMut(usize, f64) -> bool) -> Result<Profile, ProfileError> {
        let (depths, signal): (Vec<f64>, Vec<f64>) = self
            .points()
            .enumerate()
            .filter(|&(i, (d, _))| keep(i, d))
            .map(|(_, point)| point)
            .unzip();
        Profile::new(self.sample.clone(), depths, signal).map(|p| Profile {
            calibration: self.calibration,
            ..p
        })
    }

    /// Index of the point nearest to `depth`; the first one wins on ties.
    pub fn nearest_index(&self, depth: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, d) in self.depths.iter().enumerate() {
            let dist = (d - depth).abs();
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        best
    }

    /// Linear interpolation of the signal at `depth`; `None` outside the depth range.
    pub fn interpolate(&self, depth: f64) -> Option<f64> {
        let (lo, hi) = self.depth_range();
        if !(depth >= lo && depth <= hi) {
            return None;
        }
        let upper = self.depths.partition_point(|d| *d < depth);
        if upper < self.len() && self.depths[upper] == depth {
            return Some(self.signal[upper]);
        }
        let (x0, x1) = (self.depths[upper - 1], self.depths[upper]);
        let (y0, y1) = (self.signal[upper - 1], self.signal[upper]);
        Some(y0 + (depth - x0) / (x1 - x0) * (y1 - y0))
    }
}

/// Deployment metadata supplied by the loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreMetadata {
    pub deployed_at: Option<NaiveDateTime>,
    pub deployment_order: Option<u32>,
}

/// A named group of profiles measured in one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Core {
    name: String,
    samples: BTreeMap<String, Profile>,
    #[serde(default)]
    metadata: CoreMetadata,
}

impl Core {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            samples: BTreeMap::new(),
            metadata: CoreMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: CoreMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert (or replace) a profile under its sample id.
    pub fn insert(&mut self, profile: Profile) {
        self.samples.insert(profile.sample().to_string(), profile);
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.insert(profile);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &CoreMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut CoreMetadata {
        &mut self.metadata
    }

    pub fn profile(&self, sample: &str) -> Option<&Profile> {
        self.samples.get(sample)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.samples.values()
    }

    pub fn sample_ids(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `(min, max)` signal over all samples, `None` for an empty core.
    pub fn signal_bounds(&self) -> Option<(f64, f64)> {
        self.profiles()
            .map(Profile::signal_bounds)
            .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::new("s1", vec![-2.0, -1.0, 0.0, 1.0, 2.0], vec![5.0, 4.0, 3.0, 2.0, 1.0]).unwrap()
    }

    #[test]
    fn rejects_unsorted_depths() {
        let err = Profile::new("s", vec![0.0, 0.0], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidInput(_)));
    }

    #[test]
    fn shift_moves_d0_to_zero() {
        let shifted = profile().shifted(1.0);
        assert_eq!(shifted.depths(), &[-3.0, -2.0, -1.0, 0.0, 1.0]);
        assert_eq!(shifted.signal(), profile().signal());
    }

    #[test]
    fn nearest_index_prefers_first_on_tie() {
        assert_eq!(profile().nearest_index(-0.5), 1);
        assert_eq!(profile().nearest_index(10.0), 4);
    }

    #[test]
    fn interpolate_inside_and_outside() {
        let p = profile();
        assert_eq!(p.interpolate(0.5), Some(2.5));
        assert_eq!(p.interpolate(-2.0), Some(5.0));
        assert_eq!(p.interpolate(2.0), Some(1.0));
        assert_eq!(p.interpolate(2.5), None);
    }

    #[test]
    fn restricted_keeps_inclusive_window() {
        let p = profile().restricted(1.0, -1.0).unwrap();
        assert_eq!(p.depths(), &[-1.0, 0.0, 1.0]);
    }

    #[test]
    fn retained_keeps_calibration() {
        let calibrated = profile().with_calibration(CalibrationCoefficients {
            slope: 2.0,
            intercept: 0.0,
        });
        let p = calibrated.retained(|i, _| i != 2).unwrap();
        assert_eq!(p.depths(), &[-2.0, -1.0, 1.0, 2.0]);
        assert_eq!(p.calibration(), calibrated.calibration());
    }

    #[test]
    fn deserialized_profiles_are_validated() {
        let ok: Profile =
            serde_json::from_str(r#"{"sample":"s","depths":[0.0,1.0],"signal":[2.0,3.0]}"#).unwrap();
        assert_eq!(ok.len(), 2);

        let empty = serde_json::from_str::<Profile>(r#"{"sample":"s","depths":[],"signal":[]}"#);
        assert!(empty.is_err());
        let unsorted =
            serde_json::from_str::<Profile>(r#"{"sample":"s","depths":[1.0,0.0],"signal":[2.0,3.0]}"#);
        assert!(unsorted.is_err());
    }

    #[test]
    fn profile_json_round_trip() {
        let json = serde_json::to_string(&profile()).unwrap();
        assert_eq!(serde_json::from_str::<Profile>(&json).unwrap(), profile());
    }

    #[test]
    fn core_bounds_span_all_samples() {
        let other = Profile::new("s2", vec![0.0, 1.0], vec![-1.0, 9.0]).unwrap();
        let core = Core::new("C1").with_profile(profile()).with_profile(other);
        assert_eq!(core.signal_bounds(), Some((-1.0, 9.0)));
        assert_eq!(core.sample_ids().collect::<Vec<_>>(), vec!["s1", "s2"]);
    }
}
