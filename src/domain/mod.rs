//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - depth profiles and cores (`Profile`, `Core`)
//! - configuration enums (`Analyte`, `SigmoidKind`, `RegressionKind`, `CalibrationMode`)
//! - the per-analyte stage machine (`Stage`, `Analyte::allows`)
//! - the per-core visibility set

pub mod profile;
pub mod types;

pub use profile::*;
pub use types::*;
