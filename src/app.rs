//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the result to an exit code; this module:
//! - loads `.env` and initialises logging
//! - parses CLI arguments and merges them with `profiler.toml`
//! - runs the analysis / drift pipelines
//! - prints reports and writes optional exports

use std::path::Path;

use chrono::NaiveDate;
use clap::Parser;

use crate::calibration::WaterConditions;
use crate::cli::{Command, DemoArgs, DriftArgs, RunArgs, init_logging};
use crate::config::{CalibrationModeKind, ProfilerConfig};
use crate::domain::{Analyte, CalibrationMode, RegressionKind};
use crate::drift::DEFAULT_SLOT_MINUTES;
use crate::error::AppError;
use crate::fit::FitOptions;
use crate::input::{ensure_positive, ensure_slot_minutes};
use crate::io::ingest::{LoadedProfiles, load_cores, load_correlation};
use crate::session::SessionOptions;
use crate::threshold::{
    DEFAULT_LIMIT_OF_DETECTION, DEFAULT_SULFIDIC_FRONT_FRACTION, ThresholdLevel, ThresholdSpec,
};

pub mod pipeline;

use pipeline::{RunSettings, SulfideInputs};

/// Entry point for the `profiler` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Drift(args) => handle_drift(args),
        Command::Demo(args) => handle_demo(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = load_config(args.config.as_deref())?;
    let settings = run_settings(&args, &config)?;

    let loaded = load_cores(&args.input)?;
    log::info!(
        "loaded {} cores from {} ({} rows skipped)",
        loaded.cores.len(),
        args.input.display(),
        loaded.row_errors.len()
    );

    let sulfide = match (&args.ph, &args.correlation) {
        (Some(ph), Some(correlation)) => {
            if args.analyte != Analyte::H2s {
                return Err(AppError::new(2, "--ph / --correlation only apply to H2S runs"));
            }
            Some(SulfideInputs {
                ph: load_cores(ph)?,
                table: load_correlation(correlation)?,
            })
        }
        _ => None,
    };

    let output = pipeline::run_analysis(loaded, args.analyte, &settings, sulfide)?;
    print_run(&output, args.max_row_errors);

    if let Some(path) = &args.export_json {
        crate::io::export::write_report_json(path, &output.report)?;
    }
    if let Some(path) = &args.export_csv {
        crate::io::export::write_profiles_csv(path, &output.exported_cores()?)?;
    }
    Ok(())
}

fn handle_drift(args: DriftArgs) -> Result<(), AppError> {
    let config = load_config(args.config.as_deref())?;
    let kind = args
        .kind
        .or(config.drift.kind)
        .unwrap_or(RegressionKind::Linear);
    let slot_minutes = match args.slot_minutes {
        Some(minutes) => minutes,
        None => config
            .drift
            .slot_minutes
            .map(ensure_slot_minutes)
            .transpose()?
            .unwrap_or(DEFAULT_SLOT_MINUTES),
    };

    let loaded = load_cores(&args.input)?;
    let output = pipeline::run_drift(&loaded.cores, kind, slot_minutes)?;
    println!("{}", crate::report::format_drift(output.corrector.groups()));

    if let Some(path) = &args.export_json {
        crate::io::export::write_report_json(path, &output.report)?;
    }
    if let Some(path) = &args.export_csv {
        crate::io::export::write_profiles_csv(path, &output.corrected)?;
    }
    Ok(())
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let start = NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .ok_or_else(|| AppError::new(2, "invalid demo start time"))?;
    let cores = crate::data::demo_cores(args.analyte, args.cores, args.samples, args.seed, start)?;
    let rows: usize = cores
        .iter()
        .flat_map(|c| c.profiles())
        .map(|p| p.len())
        .sum();
    let loaded = LoadedProfiles {
        cores,
        row_errors: Vec::new(),
        rows_read: rows,
        rows_used: rows,
    };

    if args.analyte == Analyte::Ep {
        let output = pipeline::run_drift(&loaded.cores, RegressionKind::Linear, DEFAULT_SLOT_MINUTES)?;
        println!("{}", crate::report::format_drift(output.corrector.groups()));
        return Ok(());
    }

    let settings = RunSettings {
        session: SessionOptions {
            threshold: ThresholdSpec::default_for(args.analyte),
            ..SessionOptions::default()
        },
        calibration: args.analyte.is_calibrated().then_some(CalibrationMode::PerCore),
        crop: None,
    };
    let output = pipeline::run_analysis(loaded, args.analyte, &settings, None)?;
    print_run(&output, 0);
    Ok(())
}

fn print_run(output: &pipeline::RunOutput, max_row_errors: usize) {
    print!(
        "{}",
        crate::report::format_run_summary(&output.report, &output.loaded)
    );
    print!(
        "{}",
        crate::report::format_row_errors(&output.loaded, max_row_errors)
    );
    for core in &output.report.cores {
        println!("{}", crate::report::format_core(core));
    }
}

fn load_config(path: Option<&Path>) -> Result<ProfilerConfig, AppError> {
    match path {
        Some(path) => ProfilerConfig::from_file(path),
        None => Ok(ProfilerConfig::default()),
    }
}

/// Merge flags, config file and defaults (in that order of precedence).
pub fn run_settings(args: &RunArgs, config: &ProfilerConfig) -> Result<RunSettings, AppError> {
    let defaults = FitOptions::default();
    let fit = FitOptions {
        kind: args.fit.or(config.fit.kind).unwrap_or(defaults.kind),
        max_iterations: config.fit.max_iterations.unwrap_or(defaults.max_iterations),
        center_steps: config.fit.center_steps.unwrap_or(defaults.center_steps),
        width_steps: config.fit.width_steps.unwrap_or(defaults.width_steps),
        sigma: config
            .fit
            .sigma
            .map(|s| ensure_positive("sigma", s))
            .transpose()?
            .unwrap_or(defaults.sigma),
        ..defaults
    };

    let default_conditions = WaterConditions::default();
    let conditions = WaterConditions {
        temperature: args
            .temperature
            .or(config.calibration.temperature)
            .unwrap_or(default_conditions.temperature),
        salinity: args
            .salinity
            .or(config.calibration.salinity)
            .unwrap_or(default_conditions.salinity),
    };

    let saturation = match args.saturation {
        Some(sat) => Some(sat),
        None => config
            .calibration
            .saturation
            .map(|s| ensure_positive("saturation", s))
            .transpose()?,
    };

    let crop = match args.crop.as_deref() {
        Some(&[a, b]) => Some((a.min(b), a.max(b))),
        Some(_) => return Err(AppError::new(2, "--crop takes exactly two depths")),
        None => None,
    };

    let threshold = match &args.threshold {
        Some(raw) => {
            let level = crate::input::parse_threshold(raw)?;
            absolute_threshold(args.analyte, level)
        }
        None => match args.analyte {
            Analyte::O2 => Some(ThresholdSpec::penetration_depth(
                config
                    .threshold
                    .limit_of_detection
                    .unwrap_or(DEFAULT_LIMIT_OF_DETECTION),
            )),
            Analyte::H2s => Some(ThresholdSpec::sulfidic_front(ThresholdLevel::Relative(
                config
                    .threshold
                    .sulfidic_front_fraction
                    .map(|f| ensure_positive("sulfidic_front_fraction", f))
                    .transpose()?
                    .unwrap_or(DEFAULT_SULFIDIC_FRONT_FRACTION),
            ))),
            Analyte::Ph | Analyte::Ep => None,
        },
    };
    if args.threshold.is_some() && threshold.is_none() {
        log::warn!("{} profiles have no threshold depth; --threshold ignored", args.analyte);
    }

    let calibration = if args.analyte.is_calibrated() {
        let kind = args
            .calibration
            .or(config.calibration.mode)
            .unwrap_or(CalibrationModeKind::PerCore);
        let reference = args
            .reference
            .clone()
            .or_else(|| config.calibration.reference_core.clone());
        Some(kind.into_mode(reference)?)
    } else {
        None
    };

    Ok(RunSettings {
        session: SessionOptions {
            fit,
            conditions,
            saturation,
            threshold,
        },
        calibration,
        crop,
    })
}

fn absolute_threshold(analyte: Analyte, level: f64) -> Option<ThresholdSpec> {
    match analyte {
        Analyte::O2 => Some(ThresholdSpec::penetration_depth(level)),
        Analyte::H2s => Some(ThresholdSpec::sulfidic_front(ThresholdLevel::Absolute(level))),
        Analyte::Ph | Analyte::Ep => None,
    }
}
