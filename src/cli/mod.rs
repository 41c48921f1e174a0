//! Command-line parsing for the `profiler` binary.
//!
//! Argument parsing and logging setup live here; the pipeline itself is in
//! [`crate::app::pipeline`].

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::CalibrationModeKind;
use crate::domain::{Analyte, RegressionKind, SigmoidKind};
use crate::error::InputError;
use crate::input::{parse_depth_bound, parse_positive, parse_slot_minutes};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "profiler",
    version,
    about = "Sediment micro-profile analysis: interface correction, calibration, thresholds, drift"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve interfaces, calibrate and aggregate threshold depths for one analyte.
    Run(RunArgs),
    /// Fit the drift regression across EP deployment packages.
    Drift(DriftArgs),
    /// Run the pipeline on seeded synthetic cores.
    Demo(DemoArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Long-format profile CSV (`core,sample,depth,signal[,slope,intercept,deployed_at,deployment_order]`).
    #[arg(long, short = 'i', value_name = "CSV")]
    pub input: PathBuf,

    #[arg(long, short = 'a', value_enum)]
    pub analyte: Analyte,

    /// `profiler.toml`; flags take precedence over its values.
    #[arg(long, short = 'c', value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Sigmoid family for the interface fit.
    #[arg(long, value_enum)]
    pub fit: Option<SigmoidKind>,

    #[arg(long, value_enum)]
    pub calibration: Option<CalibrationModeKind>,

    /// Reference core for `one-core-to-all` calibration.
    #[arg(long)]
    pub reference: Option<String>,

    /// Overlying water temperature (°C).
    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub salinity: Option<f64>,

    /// Fixed upper calibration bound instead of the O2 solubility.
    #[arg(long, value_parser = parse_saturation)]
    pub saturation: Option<f64>,

    /// Absolute threshold level for the crossing depth.
    #[arg(long, allow_hyphen_values = true)]
    pub threshold: Option<String>,

    /// Measured-depth window refitted and committed on every sample.
    #[arg(
        long,
        num_args = 2,
        value_names = ["MIN", "MAX"],
        allow_hyphen_values = true,
        value_parser = parse_depth_bound
    )]
    pub crop: Option<Vec<f64>>,

    /// pH profile CSV for total sulfide (H2S runs only).
    #[arg(long, value_name = "CSV", requires = "correlation")]
    pub ph: Option<PathBuf>,

    /// H2S → pH sample correlation CSV (`h2s_sample,ph_sample`).
    #[arg(long, value_name = "CSV", requires = "ph")]
    pub correlation: Option<PathBuf>,

    /// Write the run report as JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Write the corrected (and calibrated, when available) profiles as CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Show at most this many skipped rows.
    #[arg(long, default_value_t = 20)]
    pub max_row_errors: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct DriftArgs {
    /// Long-format EP profile CSV with a `deployed_at` or `deployment_order` column.
    #[arg(long, short = 'i', value_name = "CSV")]
    pub input: PathBuf,

    #[arg(long, short = 'c', value_name = "TOML")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub kind: Option<RegressionKind>,

    /// Deployment slot length used to group cores into packages.
    #[arg(long, value_parser = parse_slot_minutes)]
    pub slot_minutes: Option<i64>,

    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Write the drift-corrected profiles as CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    #[arg(long, short = 'a', value_enum, default_value_t = Analyte::O2)]
    pub analyte: Analyte,

    #[arg(long, default_value_t = 3)]
    pub cores: usize,

    /// Replicate profiles per core.
    #[arg(long, default_value_t = 4)]
    pub samples: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

fn parse_saturation(raw: &str) -> Result<f64, InputError> {
    parse_positive("saturation", raw)
}

/// Initialise `env_logger` from the `-v` count.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // `try_init` so repeated calls (tests) do not panic.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "profiler", "-vv", "run", "-i", "cores.csv", "-a", "o2", "--calibration",
            "one-core-to-all", "--reference", "C2", "--threshold", "-0.25",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.analyte, Analyte::O2);
        assert_eq!(args.calibration, Some(CalibrationModeKind::OneCoreToAll));
        assert_eq!(args.reference.as_deref(), Some("C2"));
        assert_eq!(args.threshold.as_deref(), Some("-0.25"));
    }

    #[test]
    fn ph_requires_correlation() {
        let res = Cli::try_parse_from(["profiler", "run", "-i", "x.csv", "-a", "h2s", "--ph", "ph.csv"]);
        assert!(res.is_err());
    }

    #[test]
    fn drift_kind_names() {
        let cli = Cli::parse_from(["profiler", "drift", "-i", "ep.csv", "--kind", "polynomial2"]);
        let Command::Drift(args) = cli.command else {
            panic!("expected drift");
        };
        assert_eq!(args.kind, Some(RegressionKind::Polynomial2));
    }

    #[test]
    fn drift_slot_minutes_are_validated() {
        let cli = Cli::parse_from(["profiler", "drift", "-i", "ep.csv", "--slot-minutes", "30", "--export-csv", "out.csv"]);
        let Command::Drift(args) = cli.command else {
            panic!("expected drift");
        };
        assert_eq!(args.slot_minutes, Some(30));
        assert!(args.export_csv.is_some());

        for bad in ["0", "-5", "1.5", "soon"] {
            let res = Cli::try_parse_from(["profiler", "drift", "-i", "ep.csv", "--slot-minutes", bad]);
            assert!(res.is_err(), "{bad}");
        }
    }

    #[test]
    fn saturation_must_be_positive() {
        for bad in ["0", "-1", "abc", "inf"] {
            let res = Cli::try_parse_from(["profiler", "run", "-i", "x.csv", "-a", "o2", "--saturation", bad]);
            assert!(res.is_err(), "{bad}");
        }
    }

    #[test]
    fn crop_takes_two_depth_bounds() {
        let cli = Cli::parse_from(["profiler", "run", "-i", "x.csv", "-a", "o2", "--crop", "-600", "1200.5"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.crop, Some(vec![-600.0, 1200.5]));

        let res = Cli::try_parse_from(["profiler", "run", "-i", "x.csv", "-a", "o2", "--crop", "-600", "deep"]);
        assert!(res.is_err());
    }
}
