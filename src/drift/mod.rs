//! Drift correction across time-ordered EP packages.

pub mod corrector;

pub use corrector::*;
