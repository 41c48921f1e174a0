//! Time-ordered drift correction for redox (EP) profiles.
//!
//! Profiles are bucketed into packages by deployment time, or by the loader's
//! deployment order when no core carries a timestamp. For package `k`:
//!
//! ```text
//! average series  a_k(d) = mean over members of signal(d)
//! package average A_k    = mean over d of a_k(d)
//! regression      r(k)   ≈ A_k          (straight line or parabola in k)
//! correction      f_k    = r(k) - r(0)
//! ```
//!
//! Correcting a package subtracts `f_k` from every member signal, which puts
//! all packages on the level of the first one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{Core, Profile, RegressionKind};
use crate::error::ProfileError;
use crate::math::{polyfit, polyval};

/// Default package length.
pub const DEFAULT_SLOT_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftMember {
    pub core: String,
    pub sample: String,
}

/// Regression report for one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageFit {
    pub kind: RegressionKind,
    pub package: usize,
    pub average_series: Profile,
    /// `A_k` for every package, in time order.
    pub package_averages: Vec<f64>,
    /// Lowest power first.
    pub coefficients: Vec<f64>,
    /// `r(k)` for every package.
    pub regression_curve: Vec<f64>,
    /// Sum of squared residuals of the regression.
    pub chi_square: f64,
    pub correction_factor: f64,
}

/// What puts cores into the same package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "kebab-case")]
pub enum PackageKey {
    /// Deployment timestamp floored to the slot length.
    Slot(NaiveDateTime),
    /// Deployment order from the loaded data.
    Order(u32),
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageKey::Slot(slot) => write!(f, "{}", slot.format("%Y-%m-%d %H:%M")),
            PackageKey::Order(order) => write!(f, "deployment #{order}"),
        }
    }
}

/// Profiles deployed within one time slot (or with one deployment order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftGroup {
    pub key: PackageKey,
    pub members: Vec<DriftMember>,
    profiles: Vec<Profile>,
    fit: Option<PackageFit>,
}

impl DriftGroup {
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn fit(&self) -> Option<&PackageFit> {
        self.fit.as_ref()
    }

    fn average_series(&self, label: String) -> Result<Profile, ProfileError> {
        let Some(first) = self.profiles.first() else {
            return Err(ProfileError::invalid(format!("package `{label}` has no members")));
        };
        let signal = first
            .depths()
            .iter()
            .map(|&d| {
                let values: Vec<f64> = self.profiles.iter().filter_map(|p| p.interpolate(d)).collect();
                values.iter().sum::<f64>() / values.len() as f64
            })
            .collect();
        Profile::new(label, first.depths().to_vec(), signal)
    }
}

/// Bucket cores into packages by deployment time floored to `slot_minutes`.
///
/// When no core has a timestamp, packages follow `deployment_order` instead.
/// Packages come out in time (or order) sequence; members by core name, then
/// sample id. A core with neither, or a mix of timestamped and ordered cores,
/// is `InvalidInput`.
pub fn group_by_deployment(cores: &[Core], slot_minutes: i64) -> Result<Vec<DriftGroup>, ProfileError> {
    if slot_minutes <= 0 {
        return Err(ProfileError::invalid(format!(
            "drift slot must be positive, got {slot_minutes} minutes"
        )));
    }
    let slot_secs = slot_minutes * 60;
    let by_time = cores.iter().any(|c| c.metadata().deployed_at.is_some());

    let mut sorted: Vec<&Core> = cores.iter().collect();
    sorted.sort_by(|a, b| a.name().cmp(b.name()));

    let mut buckets: BTreeMap<PackageKey, DriftGroup> = BTreeMap::new();
    for core in sorted {
        let key = if by_time {
            let deployed = core.metadata().deployed_at.ok_or_else(|| {
                ProfileError::invalid(format!("core `{}` has no deployment timestamp", core.name()))
            })?;
            let floored = deployed.and_utc().timestamp().div_euclid(slot_secs) * slot_secs;
            let slot = DateTime::from_timestamp(floored, 0)
                .ok_or_else(|| ProfileError::invalid(format!("timestamp {deployed} out of range")))?
                .naive_utc();
            PackageKey::Slot(slot)
        } else {
            let order = core.metadata().deployment_order.ok_or_else(|| {
                ProfileError::invalid(format!(
                    "core `{}` has neither a deployment timestamp nor a deployment order",
                    core.name()
                ))
            })?;
            PackageKey::Order(order)
        };

        let group = buckets.entry(key).or_insert_with(|| DriftGroup {
            key,
            members: Vec::new(),
            profiles: Vec::new(),
            fit: None,
        });
        for profile in core.profiles() {
            group.members.push(DriftMember {
                core: core.name().to_string(),
                sample: profile.sample().to_string(),
            });
            group.profiles.push(profile.clone());
        }
    }
    Ok(buckets.into_values().filter(|g| !g.profiles.is_empty()).collect())
}

/// Fits and applies the cross-package drift regression.
#[derive(Debug, Clone, Default)]
pub struct DriftCorrector {
    groups: Vec<DriftGroup>,
}

impl DriftCorrector {
    pub fn new(groups: Vec<DriftGroup>) -> Self {
        Self { groups }
    }

    pub fn from_cores(cores: &[Core], slot_minutes: i64) -> Result<Self, ProfileError> {
        Ok(Self::new(group_by_deployment(cores, slot_minutes)?))
    }

    pub fn groups(&self) -> &[DriftGroup] {
        &self.groups
    }

    pub fn fit_package(&self, index: usize, kind: RegressionKind) -> Result<PackageFit, ProfileError> {
        if index >= self.groups.len() {
            return Err(ProfileError::invalid(format!(
                "package {index} out of range ({} packages)",
                self.groups.len()
            )));
        }
        let needed = kind.coefficient_count();
        if self.groups.len() < needed {
            return Err(ProfileError::invalid(format!(
                "{} drift regression needs at least {needed} packages, got {}",
                regression_label(kind),
                self.groups.len()
            )));
        }

        let averages: Vec<Profile> = self
            .groups
            .iter()
            .enumerate()
            .map(|(k, g)| g.average_series(format!("package-{k}")))
            .collect::<Result<_, _>>()?;
        let package_averages: Vec<f64> = averages.iter().map(Profile::mean_signal).collect();
        let positions: Vec<f64> = (0..package_averages.len()).map(|k| k as f64).collect();

        let coefficients = polyfit(&positions, &package_averages, kind.degree())
            .ok_or_else(|| ProfileError::invalid("drift regression is degenerate"))?;
        let regression_curve: Vec<f64> = positions.iter().map(|&k| polyval(&coefficients, k)).collect();
        let chi_square = package_averages
            .iter()
            .zip(&regression_curve)
            .map(|(a, r)| (a - r) * (a - r))
            .sum::<f64>();
        let correction_factor = regression_curve[index] - regression_curve[0];

        log::debug!(
            "drift package {index}: {} fit chi2={chi_square:.4} factor={correction_factor:.4}",
            regression_label(kind)
        );

        Ok(PackageFit {
            kind,
            package: index,
            average_series: averages[index].clone(),
            package_averages,
            coefficients,
            regression_curve,
            chi_square,
            correction_factor,
        })
    }

    /// Fit every package and keep the reports on the groups.
    pub fn fit_all(&mut self, kind: RegressionKind) -> Result<&[DriftGroup], ProfileError> {
        let fits = (0..self.groups.len())
            .map(|k| self.fit_package(k, kind))
            .collect::<Result<Vec<_>, _>>()?;
        for (group, fit) in self.groups.iter_mut().zip(fits) {
            group.fit = Some(fit);
        }
        Ok(&self.groups)
    }

    /// Member profiles of `index` with `factor` subtracted; depths untouched.
    pub fn apply_correction(&self, index: usize, factor: f64) -> Result<Vec<Profile>, ProfileError> {
        let group = self
            .groups
            .get(index)
            .ok_or_else(|| ProfileError::invalid(format!("package {index} out of range")))?;
        group
            .profiles
            .iter()
            .map(|p| p.with_signal(p.signal().iter().map(|s| s - factor).collect()))
            .collect()
    }

    /// `cores` with every package's own correction factor applied.
    ///
    /// Needs `fit_all` first. Metadata is carried over from `cores`.
    pub fn corrected_cores(&self, cores: &[Core]) -> Result<Vec<Core>, ProfileError> {
        let mut corrected: BTreeMap<&str, Core> = cores
            .iter()
            .map(|c| (c.name(), Core::new(c.name()).with_metadata(c.metadata().clone())))
            .collect();
        for (k, group) in self.groups.iter().enumerate() {
            let fit = group
                .fit()
                .ok_or_else(|| ProfileError::invalid(format!("package {k} has no drift fit")))?;
            let profiles = self.apply_correction(k, fit.correction_factor)?;
            for (member, profile) in group.members.iter().zip(profiles) {
                let core = corrected
                    .get_mut(member.core.as_str())
                    .ok_or_else(|| ProfileError::UnknownCore(member.core.clone()))?;
                core.insert(profile);
            }
        }
        Ok(corrected.into_values().collect())
    }
}

fn regression_label(kind: RegressionKind) -> &'static str {
    match kind {
        RegressionKind::Linear => "linear",
        RegressionKind::Polynomial2 => "quadratic",
    }
}
