//! Curve fitting.
//!
//! Responsibilities:
//!
//! - generate shape grids for the sigmoid seed search
//! - evaluate each grid node (parallel)
//! - refine the best node with Levenberg–Marquardt and report goodness of fit

pub mod fitter;
pub mod grid;

pub use fitter::*;
pub use grid::*;
