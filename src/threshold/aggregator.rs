//! Threshold-crossing depths and their per-core average.
//!
//! A crossing is searched on the calibrated profile, shallow to deep:
//!
//! - if the first point already satisfies the threshold, the crossing is its depth
//! - otherwise the depth is interpolated linearly between the first pair of
//!   adjacent points that brackets the threshold
//! - no bracketing pair means the crossing is undefined (`None`)
//!
//! Before searching, the least-squares slope of the profile is checked against
//! the search direction; a falling search on a rising profile (or vice versa) is
//! a caller error.

use serde::{Deserialize, Serialize};

use crate::domain::{Analyte, Core, Profile, VisibilitySet};
use crate::error::{PreconditionError, ProfileError};
use crate::math::{mean, population_std, slope};

/// Default O2 detection limit, in the calibrated unit.
pub const DEFAULT_LIMIT_OF_DETECTION: f64 = 0.5;
/// Default sulfidic-front level: 10 % of the profile maximum.
pub const DEFAULT_SULFIDIC_FRONT_FRACTION: f64 = 0.1;

/// Which way the signal passes the threshold with increasing depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingDirection {
    /// Signal drops below the threshold (O2 penetration).
    Falling,
    /// Signal rises above the threshold (sulfidic front).
    Rising,
}

impl CrossingDirection {
    pub fn label(self) -> &'static str {
        match self {
            CrossingDirection::Falling => "falling",
            CrossingDirection::Rising => "rising",
        }
    }

    fn satisfied(self, value: f64, threshold: f64) -> bool {
        match self {
            CrossingDirection::Falling => value <= threshold,
            CrossingDirection::Rising => value >= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ThresholdLevel {
    /// Concentration in the calibrated unit.
    Absolute(f64),
    /// Fraction of the profile's maximum concentration.
    ///
    /// Resolved per profile, so replicates with different maxima get different
    /// absolute levels. After per-core calibration this is a fraction of the
    /// calibrated range rather than of a fixed normalised unit.
    Relative(f64),
}

impl ThresholdLevel {
    fn resolve(self, profile: &Profile) -> f64 {
        match self {
            ThresholdLevel::Absolute(v) => v,
            ThresholdLevel::Relative(f) => f * profile.signal_bounds().1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub label: String,
    pub level: ThresholdLevel,
    pub direction: CrossingDirection,
}

impl ThresholdSpec {
    /// O2 penetration depth: where the concentration falls to the detection limit.
    pub fn penetration_depth(limit_of_detection: f64) -> Self {
        Self {
            label: "penetration depth".to_string(),
            level: ThresholdLevel::Absolute(limit_of_detection),
            direction: CrossingDirection::Falling,
        }
    }

    /// Sulfidic front: where H2S / ΣS first rises above `level`.
    pub fn sulfidic_front(level: ThresholdLevel) -> Self {
        Self {
            label: "sulfidic front".to_string(),
            level,
            direction: CrossingDirection::Rising,
        }
    }

    pub fn default_sulfidic_front() -> Self {
        Self::sulfidic_front(ThresholdLevel::Relative(DEFAULT_SULFIDIC_FRONT_FRACTION))
    }

    /// Threshold searched for `analyte`; `None` for analytes without one.
    pub fn default_for(analyte: Analyte) -> Option<Self> {
        match analyte {
            Analyte::O2 => Some(Self::penetration_depth(DEFAULT_LIMIT_OF_DETECTION)),
            Analyte::H2s => Some(Self::default_sulfidic_front()),
            Analyte::Ph | Analyte::Ep => None,
        }
    }
}

/// Crossing depth of one profile; `None` when the threshold is never reached.
pub fn crossing_depth(profile: &Profile, spec: &ThresholdSpec) -> Result<Option<f64>, ProfileError> {
    let depths = profile.depths();
    let signal = profile.signal();

    if let Some(trend) = slope(depths, signal) {
        let observed = if trend > 0.0 {
            Some(CrossingDirection::Rising)
        } else if trend < 0.0 {
            Some(CrossingDirection::Falling)
        } else {
            None
        };
        if let Some(observed) = observed.filter(|o| *o != spec.direction) {
            return Err(PreconditionError::TrendMismatch {
                sample: profile.sample().to_string(),
                expected: spec.direction.label(),
                observed: observed.label(),
            }
            .into());
        }
    }

    let threshold = spec.level.resolve(profile);
    if spec.direction.satisfied(signal[0], threshold) {
        return Ok(Some(depths[0]));
    }
    for i in 1..signal.len() {
        if spec.direction.satisfied(signal[i], threshold) {
            let (d0, d1) = (depths[i - 1], depths[i]);
            let (s0, s1) = (signal[i - 1], signal[i]);
            return Ok(Some(d0 + (threshold - s0) / (s1 - s0) * (d1 - d0)));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRecord {
    pub sample: String,
    pub depth: Option<f64>,
}

/// Mean and population std over the included records.
///
/// `mean` / `std` are `None` when no record is included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub n_included: usize,
    pub n_excluded: usize,
    pub n_undefined: usize,
}

pub fn aggregate(records: &[ThresholdRecord], visibility: &VisibilitySet) -> Aggregate {
    let mut values = Vec::with_capacity(records.len());
    let mut n_excluded = 0;
    let mut n_undefined = 0;
    for record in records {
        if visibility.is_excluded(&record.sample) {
            n_excluded += 1;
            continue;
        }
        match record.depth {
            Some(d) => values.push(d),
            None => n_undefined += 1,
        }
    }
    Aggregate {
        mean: mean(&values),
        std: population_std(&values),
        n_included: values.len(),
        n_excluded,
        n_undefined,
    }
}

/// Crossing table of one calibrated core, kept in sync with visibility and threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreThresholds {
    core: Core,
    spec: ThresholdSpec,
    records: Vec<ThresholdRecord>,
    visibility: VisibilitySet,
    aggregate: Aggregate,
}

impl CoreThresholds {
    pub fn compute(core: Core, spec: ThresholdSpec) -> Result<Self, ProfileError> {
        Self::with_visibility(core, spec, VisibilitySet::new())
    }

    pub fn with_visibility(
        core: Core,
        spec: ThresholdSpec,
        visibility: VisibilitySet,
    ) -> Result<Self, ProfileError> {
        let records = core
            .profiles()
            .map(|p| {
                Ok(ThresholdRecord {
                    sample: p.sample().to_string(),
                    depth: crossing_depth(p, &spec)?,
                })
            })
            .collect::<Result<Vec<_>, ProfileError>>()?;
        let aggregate = aggregate(&records, &visibility);
        log::debug!(
            "core `{}`: {} over {} samples -> mean {:?}",
            core.name(),
            spec.label,
            aggregate.n_included,
            aggregate.mean
        );
        Ok(Self {
            core,
            spec,
            records,
            visibility,
            aggregate,
        })
    }

    /// Include / exclude one sample and recompute the aggregate.
    pub fn toggle(&mut self, sample: &str) -> Result<&Aggregate, ProfileError> {
        if self.core.profile(sample).is_none() {
            return Err(ProfileError::UnknownSample(sample.to_string()));
        }
        self.visibility = self.visibility.toggle(sample);
        self.aggregate = aggregate(&self.records, &self.visibility);
        Ok(&self.aggregate)
    }

    /// Change the threshold and recompute every crossing.
    pub fn set_threshold(&mut self, spec: ThresholdSpec) -> Result<&Aggregate, ProfileError> {
        *self = Self::with_visibility(self.core.clone(), spec, self.visibility.clone())?;
        Ok(&self.aggregate)
    }

    pub fn core_name(&self) -> &str {
        self.core.name()
    }

    pub fn spec(&self) -> &ThresholdSpec {
        &self.spec
    }

    pub fn records(&self) -> &[ThresholdRecord] {
        &self.records
    }

    pub fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn linear(sample: &str, from: f64, to: f64) -> Profile {
        let depths: Vec<f64> = (0..=20).map(|i| -50.0 + 10.0 * i as f64).collect();
        let signal = depths
            .iter()
            .map(|d| from + (to - from) * (d + 50.0) / 200.0)
            .collect();
        Profile::new(sample, depths, signal).unwrap()
    }

    fn records(depths: &[Option<f64>]) -> Vec<ThresholdRecord> {
        depths
            .iter()
            .enumerate()
            .map(|(i, d)| ThresholdRecord {
                sample: format!("s{i}"),
                depth: *d,
            })
            .collect()
    }

    #[test]
    fn falling_crossing_is_interpolated() {
        let profile = linear("s", 200.0, 0.0);
        let depth = crossing_depth(&profile, &ThresholdSpec::penetration_depth(0.5))
            .unwrap()
            .unwrap();
        assert_relative_eq!(depth, 149.5, epsilon = 1e-9);
    }

    #[test]
    fn first_point_already_past_threshold() {
        let profile = linear("s", 0.4, 0.0);
        let depth = crossing_depth(&profile, &ThresholdSpec::penetration_depth(0.5)).unwrap();
        assert_eq!(depth, Some(-50.0));
    }

    #[test]
    fn no_crossing_is_undefined() {
        let profile = linear("s", 200.0, 10.0);
        assert_eq!(
            crossing_depth(&profile, &ThresholdSpec::penetration_depth(0.5)).unwrap(),
            None
        );
    }

    #[test]
    fn relative_sulfidic_front() {
        let profile = linear("s", 0.0, 100.0);
        let depth = crossing_depth(&profile, &ThresholdSpec::default_sulfidic_front())
            .unwrap()
            .unwrap();
        // 10 % of the maximum (100) is reached after a fifth of the 200 µm span.
        assert_relative_eq!(depth, -30.0, epsilon = 1e-9);
    }

    #[test]
    fn relative_level_follows_each_profile_maximum() {
        let plain = linear("a", 0.0, 100.0);
        // Same ramp, but a spike at the bottom doubles the maximum.
        let mut signal = plain.signal().to_vec();
        if let Some(last) = signal.last_mut() {
            *last = 200.0;
        }
        let spiked = Profile::new("b", plain.depths().to_vec(), signal).unwrap();

        let spec = ThresholdSpec::default_sulfidic_front();
        let a = crossing_depth(&plain, &spec).unwrap().unwrap();
        let b = crossing_depth(&spiked, &spec).unwrap().unwrap();
        assert_relative_eq!(a, -30.0, epsilon = 1e-9);
        // 10 % of 200 is reached only at 20 % of the ramp.
        assert_relative_eq!(b, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn contradicting_trend_is_rejected() {
        let profile = linear("s", 0.0, 100.0);
        let err = crossing_depth(&profile, &ThresholdSpec::penetration_depth(0.5)).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Precondition(PreconditionError::TrendMismatch {
                expected: "falling",
                observed: "rising",
                ..
            })
        ));
    }

    #[test]
    fn mean_and_population_std() {
        let agg = aggregate(
            &records(&[Some(10.0), Some(20.0), Some(30.0)]),
            &VisibilitySet::new(),
        );
        assert_relative_eq!(agg.mean.unwrap(), 20.0);
        assert_relative_eq!(agg.std.unwrap(), (200.0f64 / 3.0).sqrt());
        assert_eq!(agg.n_included, 3);
    }

    #[test]
    fn excluded_and_undefined_records_are_left_out() {
        let visibility = VisibilitySet::new().toggle("s0");
        let agg = aggregate(&records(&[Some(100.0), None, Some(30.0)]), &visibility);
        assert_eq!(agg.mean, Some(30.0));
        assert_eq!(agg.std, Some(0.0));
        assert_eq!((agg.n_included, agg.n_excluded, agg.n_undefined), (1, 1, 1));
    }

    #[test]
    fn nothing_included_is_undefined() {
        let visibility = VisibilitySet::new().toggle("s0");
        let agg = aggregate(&records(&[Some(1.0)]), &visibility);
        assert_eq!(agg.mean, None);
        assert_eq!(agg.std, None);
    }

    #[test]
    fn core_table_recomputes_on_threshold_change() {
        let core = Core::new("C1")
            .with_profile(linear("a", 200.0, 0.0))
            .with_profile(linear("b", 100.0, 0.0));
        let mut table = CoreThresholds::compute(core, ThresholdSpec::penetration_depth(0.5)).unwrap();
        let before = table.aggregate().mean.unwrap();
        table.toggle("b").unwrap();
        table.set_threshold(ThresholdSpec::penetration_depth(50.0)).unwrap();
        // Visibility survives the threshold change.
        assert!(table.visibility().is_excluded("b"));
        assert_relative_eq!(table.aggregate().mean.unwrap(), 100.0, epsilon = 1e-9);
        assert!(before > 140.0);
        assert!(table.toggle("zzz").is_err());
    }

    proptest! {
        #[test]
        fn toggling_twice_restores_aggregate(
            depths in prop::collection::vec(prop::option::of(-500.0f64..500.0), 1..12),
            pick in 0usize..12,
        ) {
            let recs = records(&depths);
            let sample = format!("s{}", pick % recs.len());
            let visibility = VisibilitySet::new();
            let twice = visibility.toggle(&sample).toggle(&sample);
            prop_assert_eq!(&twice, &visibility);
            prop_assert_eq!(aggregate(&recs, &twice), aggregate(&recs, &visibility));
        }
    }
}
