//! Exports: corrected / calibrated profiles as CSV, the run report as JSON.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::Core;
use crate::error::AppError;
use crate::report::RunReport;

/// Write profiles in the same long format the loader reads (`core,sample,depth,signal`).
pub fn write_profiles_csv(path: &Path, cores: &[Core]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    writer
        .write_record(["core", "sample", "depth", "signal"])
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;
    for core in cores {
        for profile in core.profiles() {
            for (depth, value) in profile.points() {
                writer
                    .write_record([
                        core.name(),
                        profile.sample(),
                        &format!("{depth:.4}"),
                        &format!("{value:.6}"),
                    ])
                    .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
            }
        }
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}

/// Write the run report as pretty JSON.
pub fn write_report_json(path: &Path, report: &RunReport) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create report JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .map_err(|e| AppError::new(2, format!("Failed to write report JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush report JSON: {e}")))?;
    Ok(())
}
