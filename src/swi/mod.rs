//! Sediment–water interface detection and depth re-basing.

pub mod resolver;

pub use resolver::*;
