//! Signal → concentration conversion.
//!
//! Three strategies, chosen once per session ([`CalibrationMode`]):
//!
//! - `FromFile`: `c = intercept + slope * signal` from coefficients the loader
//!   attached to each profile
//! - `PerCore`: `c = (signal - min) / (max - min) * sat`, with `min` / `max` taken
//!   over all samples of the core and `sat` from a [`Solubility`] collaborator
//! - `OneCoreToAll`: the `PerCore` factor of a reference core applied to every core
//!
//! Every strategy keeps the input depth domain exactly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::solubility::{Solubility, WaterConditions};
use crate::domain::{CalibrationMode, Core, Profile};
use crate::error::{PreconditionError, ProfileError};

/// Linear map from the `[min, max]` signal range onto `[0, saturation]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionFactor {
    pub min_signal: f64,
    pub max_signal: f64,
    pub saturation: f64,
}

impl ConversionFactor {
    pub fn new(min_signal: f64, max_signal: f64, saturation: f64) -> Result<Self, ProfileError> {
        if !(min_signal.is_finite() && max_signal.is_finite() && saturation.is_finite()) {
            return Err(ProfileError::invalid("calibration bounds must be finite"));
        }
        if max_signal == min_signal {
            return Err(ProfileError::invalid(format!(
                "degenerate signal range: min == max == {min_signal}"
            )));
        }
        Ok(Self {
            min_signal,
            max_signal,
            saturation,
        })
    }

    /// Factor from a core's signal bounds.
    pub fn from_core(core: &Core, saturation: f64) -> Result<Self, ProfileError> {
        let (lo, hi) = core
            .signal_bounds()
            .ok_or_else(|| ProfileError::invalid(format!("core `{}` has no samples", core.name())))?;
        Self::new(lo, hi, saturation)
    }

    pub fn apply(&self, signal: f64) -> f64 {
        (signal - self.min_signal) / (self.max_signal - self.min_signal) * self.saturation
    }
}

/// One core converted to concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedCore {
    pub mode: CalibrationMode,
    /// `None` for `FromFile`, where each profile carries its own coefficients.
    pub factor: Option<ConversionFactor>,
    pub core: Core,
}

/// Applies the session's calibration strategy.
pub struct CalibrationResolver {
    mode: CalibrationMode,
    solubility: Arc<dyn Solubility>,
    conditions: WaterConditions,
}

impl CalibrationResolver {
    pub fn new(
        mode: CalibrationMode,
        solubility: Arc<dyn Solubility>,
        conditions: WaterConditions,
    ) -> Self {
        Self {
            mode,
            solubility,
            conditions,
        }
    }

    pub fn mode(&self) -> &CalibrationMode {
        &self.mode
    }

    pub fn saturation(&self) -> f64 {
        self.solubility
            .saturation(self.conditions.temperature, self.conditions.salinity)
    }

    /// Convert `core`. `reference` is required for `OneCoreToAll` and must be
    /// the reference core in its current (corrected) state.
    pub fn calibrate(
        &self,
        core: &Core,
        reference: Option<&Core>,
    ) -> Result<CalibratedCore, ProfileError> {
        let factor = match &self.mode {
            CalibrationMode::FromFile => None,
            CalibrationMode::PerCore => Some(ConversionFactor::from_core(core, self.saturation())?),
            CalibrationMode::OneCoreToAll { reference: name } => {
                let reference = reference
                    .filter(|r| r.name() == name.as_str())
                    .ok_or_else(|| PreconditionError::UnknownReferenceCore(name.clone()))?;
                Some(ConversionFactor::from_core(reference, self.saturation())?)
            }
        };

        let mut out = Core::new(core.name()).with_metadata(core.metadata().clone());
        for profile in core.profiles() {
            out.insert(convert(profile, factor.as_ref())?);
        }
        log::info!("core `{}`: calibrated {} samples ({})", core.name(), out.len(), self.mode);
        Ok(CalibratedCore {
            mode: self.mode.clone(),
            factor,
            core: out,
        })
    }
}

fn convert(profile: &Profile, factor: Option<&ConversionFactor>) -> Result<Profile, ProfileError> {
    let concentration: Vec<f64> = match factor {
        Some(f) => profile.signal().iter().map(|&s| f.apply(s)).collect(),
        None => {
            let coeffs = profile
                .calibration()
                .ok_or_else(|| PreconditionError::MissingCalibration(profile.sample().to_string()))?;
            profile
                .signal()
                .iter()
                .map(|&s| coeffs.intercept + coeffs.slope * s)
                .collect()
        }
    };
    profile.with_signal(concentration)
}
