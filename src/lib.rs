//! `sediment-profiles` library crate.
//!
//! Analysis of sediment microsensor depth profiles (O2, pH, H2S, redox
//! potential): sediment–water interface correction, signal calibration,
//! threshold depths (O2 penetration, sulfidic front), total sulfide and
//! electrode drift correction.
//!
//! The binary (`profiler`) is a thin wrapper around this library so that the
//! analysis can be driven and tested without spawning processes. Interactive
//! front ends are expected to drive [`session::AnalysisSession`] directly.

pub mod app;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod drift;
pub mod error;
pub mod fit;
pub mod input;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod session;
pub mod swi;
pub mod threshold;
