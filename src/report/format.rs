//! Formatted terminal output.
//!
//! Formatting lives here so the engine modules stay free of presentation code.

use crate::calibration::{SampleSulfide, SulfideOutcome};
use crate::drift::DriftGroup;
use crate::io::ingest::LoadedProfiles;
use crate::report::{CoreReport, RunReport};
use crate::swi::CoreResolution;
use crate::threshold::Aggregate;

/// Header block: what was loaded and how it is processed.
pub fn format_run_summary(report: &RunReport, loaded: &LoadedProfiles) -> String {
    let mut out = String::new();

    out.push_str("=== profiler - sediment profile analysis ===\n");
    out.push_str(&format!("Analyte: {}\n", report.analyte.display_name()));
    out.push_str(&format!(
        "Rows: read={} used={} skipped={}\n",
        loaded.rows_read,
        loaded.rows_used,
        loaded.row_errors.len()
    ));
    out.push_str(&format!(
        "Cores: {} | samples: {}\n",
        loaded.cores.len(),
        loaded.cores.iter().map(|c| c.len()).sum::<usize>()
    ));
    if let Some(mode) = &report.calibration_mode {
        out.push_str(&format!("Calibration: {mode}\n"));
    }
    if let Some(label) = &report.threshold_label {
        out.push_str(&format!("Threshold: {label}\n"));
    }
    out.push('\n');
    out
}

/// First `limit` row errors, one per line.
pub fn format_row_errors(loaded: &LoadedProfiles, limit: usize) -> String {
    let mut out = String::new();
    if loaded.row_errors.is_empty() {
        return out;
    }
    out.push_str("Skipped rows:\n");
    for err in loaded.row_errors.iter().take(limit) {
        let sample = err.sample.as_deref().unwrap_or("-");
        out.push_str(&format!("  line {:>5} [{sample}] {}\n", err.line, err.message));
    }
    if loaded.row_errors.len() > limit {
        out.push_str(&format!("  ... {} more\n", loaded.row_errors.len() - limit));
    }
    out.push('\n');
    out
}

pub fn format_core(core: &CoreReport) -> String {
    if let Some(reason) = &core.failure {
        return format!("Core {} | needs review: {reason}\n", core.resolution.core);
    }
    let mut out = format_resolution(&core.resolution);
    if let Some(aggregate) = &core.aggregate {
        out.push_str(&format!("  {}\n", format_aggregate(aggregate)));
        for record in &core.crossings {
            let depth = record
                .depth
                .map(|d| format!("{d:>10.2}"))
                .unwrap_or_else(|| format!("{:>10}", "undefined"));
            out.push_str(&format!("    {:<16} {depth}\n", record.sample));
        }
    }
    if !core.sulfide.is_empty() {
        out.push_str(&format_sulfide(&core.sulfide));
    }
    out
}

pub fn format_resolution(resolution: &CoreResolution) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Core {} | interface d0 = {:.2}\n",
        resolution.core, resolution.interface_depth
    ));
    out.push_str(&format!(
        "  {:<16} {:>10} {:>10} {:>10}  {:<10} {}\n",
        "sample", "interface", "shift", "redchi2", "quality", "status"
    ));
    for s in &resolution.samples {
        out.push_str(&format!(
            "  {:<16} {:>10} {:>10.2} {:>10} {:<10} {}\n",
            s.sample,
            fmt_opt(s.interface_depth),
            s.shift,
            fmt_opt(s.reduced_chi_square),
            s.quality.map(|q| q.label()).unwrap_or("-"),
            s.status.label()
        ));
    }
    out
}

pub fn format_aggregate(aggregate: &Aggregate) -> String {
    match (aggregate.mean, aggregate.std) {
        (Some(mean), Some(std)) => format!(
            "mean = {mean:.2} ± {std:.2} (n={}, excluded={}, undefined={})",
            aggregate.n_included, aggregate.n_excluded, aggregate.n_undefined
        ),
        _ => format!(
            "mean undefined (excluded={}, undefined={})",
            aggregate.n_excluded, aggregate.n_undefined
        ),
    }
}

fn format_sulfide(entries: &[SampleSulfide]) -> String {
    let mut out = String::from("  total sulfide:\n");
    for entry in entries {
        match &entry.outcome {
            SulfideOutcome::Computed { profile } => {
                let (_, max) = profile.signal_bounds();
                out.push_str(&format!(
                    "    {:<16} {} points, max {max:.2}\n",
                    entry.sample,
                    profile.len()
                ));
            }
            SulfideOutcome::Skipped { reason } => {
                out.push_str(&format!("    {:<16} skipped: {reason}\n", entry.sample));
            }
        }
    }
    out
}

pub fn format_drift(groups: &[DriftGroup]) -> String {
    let mut out = String::from("Drift packages:\n");
    out.push_str(&format!(
        "  {:<3} {:<19} {:>7} {:>12} {:>12} {:>12}\n",
        "#", "package", "members", "average", "regression", "factor"
    ));
    for (k, group) in groups.iter().enumerate() {
        let (avg, reg, factor) = match group.fit() {
            Some(fit) => (
                format!("{:.3}", fit.package_averages[k]),
                format!("{:.3}", fit.regression_curve[k]),
                format!("{:.3}", fit.correction_factor),
            ),
            None => ("-".into(), "-".into(), "-".into()),
        };
        out.push_str(&format!(
            "  {:<3} {:<19} {:>7} {:>12} {:>12} {:>12}\n",
            k,
            group.key.to_string(),
            group.members.len(),
            avg,
            reg,
            factor
        ));
    }
    if let Some(fit) = groups.first().and_then(|g| g.fit()) {
        out.push_str(&format!(
            "  coefficients: {} | chi2 = {:.4}\n",
            fmt_vec(&fit.coefficients),
            fit.chi_square
        ));
    }
    out
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swi::{SampleFitStatus, SampleResolution};

    #[test]
    fn undefined_aggregate_is_spelled_out() {
        let agg = Aggregate {
            mean: None,
            std: None,
            n_included: 0,
            n_excluded: 2,
            n_undefined: 1,
        };
        assert_eq!(format_aggregate(&agg), "mean undefined (excluded=2, undefined=1)");
    }

    #[test]
    fn resolution_table_lists_samples() {
        let resolution = CoreResolution {
            core: "C1".into(),
            interface_depth: 12.5,
            samples: vec![SampleResolution {
                sample: "C1-01".into(),
                status: SampleFitStatus::NeedsReview,
                interface_depth: None,
                shift: 12.5,
                reduced_chi_square: None,
                quality: None,
            }],
        };
        let text = format_resolution(&resolution);
        assert!(text.starts_with("Core C1 | interface d0 = 12.50"));
        assert!(text.contains("needs review"));
    }

    #[test]
    fn failed_core_prints_its_reason() {
        let core = CoreReport {
            resolution: CoreResolution {
                core: "C2".into(),
                interface_depth: 0.0,
                samples: Vec::new(),
            },
            calibration: None,
            crossings: Vec::new(),
            aggregate: None,
            sulfide: Vec::new(),
            failure: Some("too few points".into()),
        };
        assert_eq!(format_core(&core), "Core C2 | needs review: too few points\n");
    }
}
