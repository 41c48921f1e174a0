//! Calibration: signal to concentration, O2 solubility and total sulfide.

pub mod resolver;
pub mod solubility;
pub mod sulfide;

pub use resolver::*;
pub use solubility::*;
pub use sulfide::*;
