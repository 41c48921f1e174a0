//! Total dissolved sulfide from H2S and pH profiles.
//!
//! `ΣS = [H2S] * (1 + 10^(pH - pK1))`, with the first dissociation constant of
//! H2S after Millero (1988). pH is interpolated linearly onto the H2S depths;
//! H2S points outside the pH depth range are dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::solubility::WaterConditions;
use crate::domain::{Core, Profile};
use crate::error::ProfileError;

/// Links H2S samples to the pH sample measured alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationTable {
    links: BTreeMap<String, String>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&mut self, h2s_sample: impl Into<String>, ph_sample: impl Into<String>) {
        self.links.insert(h2s_sample.into(), ph_sample.into());
    }

    pub fn ph_sample(&self, h2s_sample: &str) -> Option<&str> {
        self.links.get(h2s_sample).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl FromIterator<(String, String)> for CorrelationTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            links: iter.into_iter().collect(),
        }
    }
}

/// pK1 of H2S (Millero 1988); temperature in °C.
pub fn pk1(conditions: WaterConditions) -> f64 {
    let t = conditions.temperature + 273.15;
    let s = conditions.salinity;
    -98.08 + 5765.4 / t + 15.04555 * t.ln() - 0.157 * s.sqrt() + 0.0135 * s
}

/// ΣS for one H2S profile and its pH profile.
pub fn total_sulfide(
    h2s: &Profile,
    ph: &Profile,
    conditions: WaterConditions,
) -> Result<Profile, ProfileError> {
    let pk = pk1(conditions);
    let (depths, values): (Vec<f64>, Vec<f64>) = h2s
        .points()
        .filter_map(|(d, c)| ph.interpolate(d).map(|p| (d, c * (1.0 + 10f64.powf(p - pk)))))
        .unzip();
    if depths.is_empty() {
        return Err(ProfileError::invalid(format!(
            "pH sample `{}` does not overlap H2S sample `{}`",
            ph.sample(),
            h2s.sample()
        )));
    }
    Profile::new(h2s.sample(), depths, values)
}

/// Outcome for one H2S sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SulfideOutcome {
    Computed { profile: Profile },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSulfide {
    pub sample: String,
    pub outcome: SulfideOutcome,
}

/// ΣS for every sample of an H2S core. pH samples are looked up by id across
/// `ph_cores`. Samples without a usable pH link are skipped with a warning;
/// the H2S results themselves are unaffected.
pub fn total_sulfide_for_core(
    h2s: &Core,
    ph_cores: &[Core],
    table: &CorrelationTable,
    conditions: WaterConditions,
) -> Vec<SampleSulfide> {
    h2s.profiles()
        .map(|profile| {
            let sample = profile.sample().to_string();
            let outcome = match lookup(profile.sample(), ph_cores, table) {
                Ok(ph) => match total_sulfide(profile, ph, conditions) {
                    Ok(profile) => SulfideOutcome::Computed { profile },
                    Err(err) => SulfideOutcome::Skipped {
                        reason: err.to_string(),
                    },
                },
                Err(reason) => SulfideOutcome::Skipped { reason },
            };
            if let SulfideOutcome::Skipped { reason } = &outcome {
                log::warn!("total sulfide skipped for `{sample}`: {reason}");
            }
            SampleSulfide { sample, outcome }
        })
        .collect()
}

fn lookup<'a>(
    h2s_sample: &str,
    ph_cores: &'a [Core],
    table: &CorrelationTable,
) -> Result<&'a Profile, String> {
    let ph_sample = table
        .ph_sample(h2s_sample)
        .ok_or_else(|| "no pH sample is correlated with it".to_string())?;
    ph_cores
        .iter()
        .find_map(|core| core.profile(ph_sample))
        .ok_or_else(|| format!("correlated pH sample `{ph_sample}` is not loaded"))
}
