//! Data sources that do not come from the CSV loader.

pub mod synthetic;

pub use synthetic::*;
