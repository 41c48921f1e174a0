//! CSV ingest for depth profiles.
//!
//! Profiles come in long format, one measurement per row:
//!
//! ```text
//! core,sample,depth,signal[,slope,intercept,deployed_at,deployment_order]
//! ```
//!
//! - **Strict schema** for required columns (exit code 2)
//! - **Row-level validation**: bad rows are skipped and reported
//! - rows of a sample may come in any order; they are sorted by depth and
//!   duplicate depths are rejected
//! - `slope` / `intercept` (embedded calibration), `deployed_at` and
//!   `deployment_order` are optional; the first non-empty value per sample / core
//!   is used

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::StringRecord;

use crate::calibration::CorrelationTable;
use crate::domain::{CalibrationCoefficients, Core, CoreMetadata, Profile};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub sample: Option<String>,
    pub message: String,
}

/// Ingest output: cores in name order plus what was skipped.
#[derive(Debug, Clone)]
pub struct LoadedProfiles {
    pub cores: Vec<Core>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

#[derive(Debug)]
struct Row {
    core: String,
    sample: String,
    depth: f64,
    signal: f64,
    calibration: Option<CalibrationCoefficients>,
    deployed_at: Option<NaiveDateTime>,
    deployment_order: Option<u32>,
}

#[derive(Debug, Default)]
struct SampleRows {
    first_line: usize,
    // (depth, signal, line)
    points: Vec<(f64, f64, usize)>,
    calibration: Option<CalibrationCoefficients>,
}

#[derive(Debug, Default)]
struct CoreRows {
    deployed_at: Option<NaiveDateTime>,
    deployment_order: Option<u32>,
    samples: BTreeMap<String, SampleRows>,
}

/// Load long-format profile CSV.
pub fn load_cores(path: &Path) -> Result<LoadedProfiles, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    for name in ["core", "sample", "depth", "signal"] {
        if !header_map.contains_key(name) {
            return Err(AppError::new(2, format!("Missing required column: `{name}`")));
        }
    }

    let mut grouped: BTreeMap<String, CoreRows> = BTreeMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header line, 1-based line numbers.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    sample: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let row = match parse_row(&record, &header_map) {
            Ok(row) => row,
            Err(message) => {
                row_errors.push(RowError {
                    line,
                    sample: get_optional(&record, &header_map, "sample").map(str::to_string),
                    message,
                });
                continue;
            }
        };

        let core = grouped.entry(row.core).or_default();
        if core.deployed_at.is_none() {
            core.deployed_at = row.deployed_at;
        }
        if core.deployment_order.is_none() {
            core.deployment_order = row.deployment_order;
        }
        let sample = core.samples.entry(row.sample).or_insert_with(|| SampleRows {
            first_line: line,
            ..SampleRows::default()
        });
        if sample.calibration.is_none() {
            sample.calibration = row.calibration;
        }
        sample.points.push((row.depth, row.signal, line));
    }

    let mut cores = Vec::with_capacity(grouped.len());
    let mut rows_used = 0usize;
    for (name, rows) in grouped {
        let mut core = Core::new(name).with_metadata(CoreMetadata {
            deployed_at: rows.deployed_at,
            deployment_order: rows.deployment_order,
        });
        for (sample_id, mut sample) in rows.samples {
            sample.points.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut depths = Vec::with_capacity(sample.points.len());
            let mut signal = Vec::with_capacity(sample.points.len());
            for (depth, value, line) in sample.points {
                if depths.last() == Some(&depth) {
                    row_errors.push(RowError {
                        line,
                        sample: Some(sample_id.clone()),
                        message: format!("Duplicate depth {depth}"),
                    });
                    continue;
                }
                depths.push(depth);
                signal.push(value);
            }
            let n = depths.len();
            match Profile::new(sample_id.clone(), depths, signal) {
                Ok(profile) => {
                    rows_used += n;
                    core.insert(match sample.calibration {
                        Some(c) => profile.with_calibration(c),
                        None => profile,
                    });
                }
                Err(e) => row_errors.push(RowError {
                    line: sample.first_line,
                    sample: Some(sample_id),
                    message: e.to_string(),
                }),
            }
        }
        if !core.is_empty() {
            cores.push(core);
        }
    }

    if cores.is_empty() {
        return Err(AppError::new(3, "No valid rows remain after validation."));
    }

    Ok(LoadedProfiles {
        cores,
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Load the H2S → pH sample correlation (`h2s_sample,ph_sample`).
pub fn load_correlation(path: &Path) -> Result<CorrelationTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let mut table = CorrelationTable::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| AppError::new(2, format!("Line {line}: CSV parse error: {e}")))?;
        let h2s = get_required(&record, &header_map, "h2s_sample")
            .map_err(|e| AppError::new(2, format!("Line {line}: {e}")))?;
        let ph = get_required(&record, &header_map, "ph_sample")
            .map_err(|e| AppError::new(2, format!("Line {line}: {e}")))?;
        table.link(h2s, ph);
    }
    Ok(table)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<Row, String> {
    let core = get_required(record, header_map, "core")?.to_string();
    let sample = get_required(record, header_map, "sample")?.to_string();
    let depth = parse_f64("depth", get_required(record, header_map, "depth")?)?;
    let signal = parse_f64("signal", get_required(record, header_map, "signal")?)?;

    let slope = get_optional(record, header_map, "slope")
        .map(|s| parse_f64("slope", s))
        .transpose()?;
    let intercept = get_optional(record, header_map, "intercept")
        .map(|s| parse_f64("intercept", s))
        .transpose()?;
    let calibration = match (slope, intercept) {
        (Some(slope), Some(intercept)) => Some(CalibrationCoefficients { slope, intercept }),
        (None, None) => None,
        _ => return Err("`slope` and `intercept` must be given together.".to_string()),
    };

    let deployed_at = get_optional(record, header_map, "deployed_at")
        .map(parse_timestamp)
        .transpose()?;
    let deployment_order = get_optional(record, header_map, "deployment_order")
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| format!("Invalid `deployment_order` value '{s}'. Expected a whole number."))
        })
        .transpose()?;

    Ok(Row {
        core,
        sample,
        depth,
        signal,
        calibration,
        deployed_at,
        deployment_order,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(field: &str, s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Invalid `{field}` value '{s}'.")),
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    const FMTS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%d.%m.%Y %H:%M",
    ];
    for fmt in FMTS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t);
        }
    }
    Err(format!(
        "Invalid timestamp '{s}'. Expected YYYY-MM-DD HH:MM[:SS] or DD.MM.YYYY HH:MM."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn groups_and_sorts_rows() {
        let file = csv_file(
            "core,sample,depth,signal,deployed_at\n\
             C2,b1,0,5,2024-05-01 10:30\n\
             C1,a1,100,1,2024-05-01 09:00\n\
             C1,a1,-100,3,\n\
             C1,a1,0,2,\n\
             C1,a2,0,9,\n",
        );
        let loaded = load_cores(file.path()).unwrap();
        assert_eq!(loaded.rows_read, 5);
        assert_eq!(loaded.rows_used, 5);
        assert_eq!(loaded.cores.len(), 2);

        let c1 = &loaded.cores[0];
        assert_eq!(c1.name(), "C1");
        let a1 = c1.profile("a1").unwrap();
        assert_eq!(a1.depths(), &[-100.0, 0.0, 100.0]);
        assert_eq!(a1.signal(), &[3.0, 2.0, 1.0]);
        assert_eq!(
            c1.metadata().deployed_at,
            Some(parse_timestamp("2024-05-01 09:00").unwrap())
        );
    }

    #[test]
    fn deployment_order_column_is_read_per_core() {
        let file = csv_file(
            "core,sample,depth,signal,deployment_order\n\
             C1,a1,0,1,2\n\
             C1,a1,10,2,\n\
             C2,b1,0,1,1\n\
             C3,c1,0,1,first\n",
        );
        let loaded = load_cores(file.path()).unwrap();
        assert_eq!(loaded.cores.len(), 2);
        assert_eq!(loaded.cores[0].metadata().deployment_order, Some(2));
        assert_eq!(loaded.cores[1].metadata().deployment_order, Some(1));
        assert_eq!(loaded.row_errors.len(), 1);
        assert!(loaded.row_errors[0].message.contains("deployment_order"));
    }

    #[test]
    fn bad_rows_are_reported_not_fatal() {
        let file = csv_file(
            "core,sample,depth,signal\n\
             C1,a1,0,1\n\
             C1,a1,abc,2\n\
             C1,a1,10,\n\
             C1,a1,0,4\n\
             C1,a1,20,3\n",
        );
        let loaded = load_cores(file.path()).unwrap();
        assert_eq!(loaded.row_errors.len(), 3);
        assert_eq!(loaded.row_errors[0].line, 3);
        assert!(loaded.row_errors[2].message.contains("Duplicate depth"));
        assert_eq!(loaded.cores[0].profile("a1").unwrap().len(), 2);
    }

    #[test]
    fn embedded_calibration_is_attached() {
        let file = csv_file(
            "core,sample,depth,signal,slope,intercept\n\
             C1,a1,0,1,2.5,-1\n\
             C1,a1,1,2,,\n",
        );
        let loaded = load_cores(file.path()).unwrap();
        let calibration = loaded.cores[0].profile("a1").unwrap().calibration().unwrap();
        assert_eq!(calibration.slope, 2.5);
        assert_eq!(calibration.intercept, -1.0);
    }

    #[test]
    fn missing_column_is_config_error() {
        let file = csv_file("core,sample,signal\nC1,a,1\n");
        let err = load_cores(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn no_valid_rows_is_data_error() {
        let file = csv_file("core,sample,depth,signal\nC1,a,x,1\n");
        let err = load_cores(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn correlation_table() {
        let file = csv_file("h2s_sample,ph_sample\nh1,p1\nh2,p2\n");
        let table = load_correlation(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.ph_sample("h2"), Some("p2"));
    }
}
