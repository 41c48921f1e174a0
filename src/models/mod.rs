//! Sigmoid model implementations.
//!
//! Models are implemented as small, pure functions so that fitting/search code can
//! stay generic over the sigmoid family.

pub mod model;

pub use model::*;
