//! Threshold depths (O2 penetration, sulfidic front) and visibility-controlled averaging.

pub mod aggregator;

pub use aggregator::*;
