//! Synthetic microsensor profiles.
//!
//! Profiles are drawn from the sigmoid model with Gaussian noise. Generation is
//! seeded so demos and tests are reproducible.

use chrono::{Duration, NaiveDateTime};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Analyte, Core, CoreMetadata, Profile};
use crate::error::ProfileError;
use crate::models::{predict, SigmoidParams};

/// Shape and sampling of one synthetic profile.
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub sample: String,
    pub params: SigmoidParams,
    /// First depth (µm, negative = overlying water).
    pub depth_start: f64,
    pub depth_step: f64,
    pub n_points: usize,
    /// Standard deviation of the additive noise (0 disables noise).
    pub noise_sd: f64,
    pub seed: u64,
}

impl SyntheticSpec {
    /// Typical shape for `analyte` with the transition at `interface`.
    pub fn for_analyte(analyte: Analyte, sample: impl Into<String>, interface: f64, seed: u64) -> Self {
        let (top, bottom): (f64, f64) = match analyte {
            Analyte::O2 => (250.0, 0.0),
            Analyte::Ph => (8.1, 7.2),
            Analyte::H2s => (0.0, 120.0),
            Analyte::Ep => (350.0, -150.0),
        };
        let noise_sd = (top - bottom).abs() * 0.005;
        Self {
            sample: sample.into(),
            params: SigmoidParams {
                top,
                bottom,
                center: interface,
                width: 150.0,
                nu: 1.0,
            },
            depth_start: -2000.0,
            depth_step: 50.0,
            n_points: 121,
            noise_sd,
            seed,
        }
    }
}

/// Draw one profile.
pub fn synthetic_profile(spec: &SyntheticSpec) -> Result<Profile, ProfileError> {
    if spec.n_points == 0 || !(spec.depth_step > 0.0) {
        return Err(ProfileError::invalid("synthetic profile needs points and a positive step"));
    }
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let normal = Normal::new(0.0, spec.noise_sd.max(0.0))
        .map_err(|e| ProfileError::invalid(format!("noise distribution error: {e}")))?;

    let depths: Vec<f64> = (0..spec.n_points)
        .map(|i| spec.depth_start + spec.depth_step * i as f64)
        .collect();
    let signal = depths
        .iter()
        .map(|&d| {
            let noise = if spec.noise_sd > 0.0 { normal.sample(&mut rng) } else { 0.0 };
            predict(&spec.params, d) + noise
        })
        .collect();
    Profile::new(spec.sample.clone(), depths, signal)
}

/// A core of `n_samples` replicate profiles whose interfaces scatter around
/// `interface` by up to ±`jitter`.
pub fn synthetic_core(
    name: &str,
    analyte: Analyte,
    n_samples: usize,
    interface: f64,
    jitter: f64,
    seed: u64,
    deployed_at: Option<NaiveDateTime>,
) -> Result<Core, ProfileError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut core = Core::new(name).with_metadata(CoreMetadata {
        deployed_at,
        deployment_order: None,
    });
    for i in 0..n_samples {
        let offset = if jitter > 0.0 { rng.gen_range(-jitter..=jitter) } else { 0.0 };
        let spec = SyntheticSpec::for_analyte(
            analyte,
            format!("{name}-{:02}", i + 1),
            interface + offset,
            rng.gen_range(0..u64::MAX),
        );
        core.insert(synthetic_profile(&spec)?);
    }
    Ok(core)
}

/// Signal lost per deployment by the demo EP electrodes.
const EP_DEMO_DRIFT: f64 = 15.0;

/// Demo dataset: `n_cores` cores deployed one hour apart (deployment order
/// `1..=n_cores`), each interface 100 µm deeper than the previous one. EP cores
/// also drift downwards between deployments.
pub fn demo_cores(
    analyte: Analyte,
    n_cores: usize,
    n_samples: usize,
    seed: u64,
    start: NaiveDateTime,
) -> Result<Vec<Core>, ProfileError> {
    (0..n_cores)
        .map(|i| {
            let core = synthetic_core(
                &format!("C{}", i + 1),
                analyte,
                n_samples,
                100.0 * i as f64,
                50.0,
                seed.wrapping_add(i as u64),
                Some(start + Duration::hours(i as i64)),
            )?;
            let metadata = CoreMetadata {
                deployment_order: u32::try_from(i + 1).ok(),
                ..core.metadata().clone()
            };
            let offset = -EP_DEMO_DRIFT * i as f64;
            let mut ordered = Core::new(core.name()).with_metadata(metadata);
            for profile in core.profiles() {
                if analyte == Analyte::Ep {
                    ordered.insert(profile.with_signal(profile.signal().iter().map(|s| s + offset).collect())?);
                } else {
                    ordered.insert(profile.clone());
                }
            }
            Ok(ordered)
        })
        .collect()
}
