//! End-to-end: CSV ingest -> interface correction -> calibration -> threshold depths.

use std::io::Write;

use approx::assert_relative_eq;
use sediment_profiles::data::synthetic_core;
use sediment_profiles::domain::{Analyte, CalibrationMode, Stage};
use sediment_profiles::io::ingest::load_cores;
use sediment_profiles::session::{AnalysisSession, SessionOptions};
use sediment_profiles::threshold::ThresholdSpec;

fn linear_csv() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "core,sample,depth,signal,slope,intercept").unwrap();
    // Rows deliberately out of depth order.
    for depth in (-50..=150).rev().step_by(10) {
        let signal = 150.0 - depth as f64;
        writeln!(file, "C1,lin,{depth},{signal},1.0,0.0").unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn linear_profile_crosses_detection_limit_at_149_5() {
    let file = linear_csv();
    let loaded = load_cores(file.path()).unwrap();
    assert!(loaded.row_errors.is_empty());
    assert_eq!(loaded.rows_used, 21);

    let mut session = AnalysisSession::new(
        Analyte::O2,
        SessionOptions {
            threshold: Some(ThresholdSpec::penetration_depth(0.5)),
            ..SessionOptions::default()
        },
    );
    for core in loaded.cores {
        session.load_core(core);
    }
    session.skip_swi("C1").unwrap();
    session.set_calibration_mode(CalibrationMode::FromFile).unwrap();
    session.calibrate("C1").unwrap();
    let table = session.aggregate("C1").unwrap();

    let depth = table.records()[0].depth.unwrap();
    assert_relative_eq!(depth, 149.5, epsilon = 1e-9);
    assert_relative_eq!(table.aggregate().mean.unwrap(), 149.5, epsilon = 1e-9);
    assert_eq!(table.aggregate().std, Some(0.0));
    assert_eq!(session.stage("C1").unwrap(), Stage::Aggregated);
}

#[test]
fn per_core_concentration_at_interface_matches_scaled_raw_value() {
    let core = synthetic_core("C7", Analyte::O2, 3, 180.0, 40.0, 2024, None).unwrap();
    let mut session = AnalysisSession::new(
        Analyte::O2,
        SessionOptions {
            saturation: Some(250.0),
            ..SessionOptions::default()
        },
    );
    session.load_core(core.clone());
    session.resolve_swi("C7").unwrap();
    session.set_calibration_mode(CalibrationMode::PerCore).unwrap();

    let d0 = session.resolver("C7").unwrap().interface_depth();
    // The interface estimate lands near the generating transition.
    assert!((d0 - 180.0).abs() < 60.0, "d0={d0}");

    let calibrated = session.calibrate("C7").unwrap().clone();
    let factor = calibrated.factor.unwrap();
    for raw in core.profiles() {
        let expected = factor.apply(raw.interpolate(d0).unwrap());
        let converted = calibrated.core.profile(raw.sample()).unwrap();
        let at_zero = converted.interpolate(0.0).unwrap();
        assert_relative_eq!(at_zero, expected, epsilon = 1e-6);
    }
}
