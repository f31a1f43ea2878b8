use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ensemble::{EnsembleRun, SensorBank, UnitStatus, VariantSeries};
use crate::error::EnsembleResult;
use crate::filters::FilterVariant;

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportEntry {
    /// `"{subject}_{session}_{Variant}_{Bank}"` or without subject for single runs
    pub label: String,
    pub stream: String,
    pub variant: String,
    pub bank: SensorBank,
    #[serde(flatten)]
    pub status: UnitStatus,
    pub elapsed_secs: f64,
}

/// Timing and status of every unit in a batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// RFC3339, UTC
    pub started_at: String,
    pub finished_at: Option<String>,
    pub entries: Vec<ReportEntry>,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            entries: Vec::new(),
        }
    }

    /// Append every unit of `run`, labels prefixed with `prefix` when given.
    pub fn record_run(&mut self, prefix: Option<&str>, run: &EnsembleRun) {
        for outcome in &run.outcomes {
            self.entries.push(ReportEntry {
                label: prefixed(prefix, &outcome.label),
                stream: run.label.clone(),
                variant: outcome.variant.label(),
                bank: outcome.bank,
                status: outcome.status.clone(),
                elapsed_secs: outcome.elapsed_secs,
            });
        }
    }

    /// A stream that never reached the filters fails every unit it would have run.
    pub fn record_rejected(
        &mut self,
        prefix: Option<&str>,
        stream: &str,
        banks: &[SensorBank],
        variants: &[FilterVariant],
        reason: &str,
    ) {
        for &bank in banks {
            for variant in variants {
                let label = format!("{}_{}_{}", stream, variant, bank);
                self.entries.push(ReportEntry {
                    label: prefixed(prefix, &label),
                    stream: stream.to_string(),
                    variant: variant.label(),
                    bank,
                    status: UnitStatus::Failed {
                        reason: reason.to_string(),
                    },
                    elapsed_secs: 0.0,
                });
            }
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now().to_rfc3339());
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| !e.status.is_completed())
    }
}

fn prefixed(prefix: Option<&str>, label: &str) -> String {
    match prefix {
        Some(p) => format!("{}_{}", p, label),
        None => label.to_string(),
    }
}

// ─── Writers ─────────────────────────────────────────────────────────────────

/// Single column, six decimals, no header.
pub fn write_series(path: &Path, values: &[f64]) -> EnsembleResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for v in values {
        writer.write_record([format!("{:.6}", v)])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the seven series of one variant; empty series (failed banks) are skipped.
pub fn write_variant_series(
    dir: &Path,
    stream: &str,
    variant: FilterVariant,
    series: &VariantSeries,
) -> EnsembleResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let files: [(&str, &Vec<f64>); 7] = [
        ("amplitude_All", &series.predicted_all),
        ("amplitude_Original", &series.ground_truth),
        ("amplitude_WC", &series.predicted_significant),
        ("amplitude_NWC", &series.predicted_non_significant),
        ("y_All", &series.observed_all),
        ("y_WC", &series.observed_significant),
        ("y_NWC", &series.observed_non_significant),
    ];

    let mut written = Vec::new();
    for (suffix, values) in files {
        if values.is_empty() {
            continue;
        }
        let path = dir.join(format!("{}_{}_{}.csv", stream, variant, suffix));
        write_series(&path, values)?;
        written.push(path);
    }
    Ok(written)
}

/// Export every variant of `run`, sanitized for the persistence layer.
pub fn write_run(dir: &Path, run: &EnsembleRun) -> EnsembleResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for variant in run.variants() {
        let series = run.variant_series(variant).sanitized();
        written.extend(write_variant_series(dir, &run.label, variant, &series)?);
    }
    log::info!("{}: wrote {} series files to {}", run.label, written.len(), dir.display());
    Ok(written)
}

/// `"{label}: {secs:.3}s"` per line.
pub fn write_execution_times<'a>(
    path: &Path,
    entries: impl IntoIterator<Item = &'a ReportEntry>,
) -> EnsembleResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for entry in entries {
        writeln!(out, "{}: {:.3}s", entry.label, entry.elapsed_secs)?;
    }
    out.flush()?;
    Ok(())
}

/// One failed label per line.
pub fn write_failures<'a>(
    path: &Path,
    entries: impl IntoIterator<Item = &'a ReportEntry>,
) -> EnsembleResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for entry in entries {
        writeln!(out, "{}", entry.label)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_report_json(path: &Path, report: &BatchReport) -> EnsembleResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{AssimilatorKind, PropagatorKind};

    fn variant() -> FilterVariant {
        FilterVariant::new(PropagatorKind::Givens, AssimilatorKind::Potter)
    }

    fn entry(label: &str, status: UnitStatus, secs: f64) -> ReportEntry {
        ReportEntry {
            label: label.to_string(),
            stream: "S2".to_string(),
            variant: variant().label(),
            bank: SensorBank::All,
            status,
            elapsed_secs: secs,
        }
    }

    #[test]
    fn test_series_file_names_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let series = VariantSeries {
            ground_truth: vec![1.0, 2.5],
            predicted_all: vec![0.1234567, -3.0],
            observed_significant: vec![4.0, 5.0],
            ..VariantSeries::default()
        };
        let written = write_variant_series(dir.path(), "S2", variant(), &series).unwrap();
        assert_eq!(written.len(), 3);

        let all = fs::read_to_string(dir.path().join("S2_Potter_Givens_amplitude_All.csv")).unwrap();
        assert_eq!(all, "0.123457\n-3.000000\n");
        assert!(dir.path().join("S2_Potter_Givens_amplitude_Original.csv").exists());
        assert!(dir.path().join("S2_Potter_Givens_y_WC.csv").exists());
        assert!(!dir.path().join("S2_Potter_Givens_y_NWC.csv").exists());
    }

    #[test]
    fn test_execution_times_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = BatchReport::new();
        report.entries.push(entry("karen_S2_Potter_Givens_All", UnitStatus::Completed, 1.23456));
        report.entries.push(entry(
            "karen_S2_Potter_Givens_WC",
            UnitStatus::Failed {
                reason: "Numerical failure: pivot".into(),
            },
            0.5,
        ));
        report.entries.push(entry("ana_S2_Potter_Givens_All", UnitStatus::Completed, 2.0));

        let times = dir.path().join("times.txt");
        write_execution_times(&times, &report.entries[..2]).unwrap();
        let text = fs::read_to_string(&times).unwrap();
        assert_eq!(
            text,
            "karen_S2_Potter_Givens_All: 1.235s\nkaren_S2_Potter_Givens_WC: 0.500s\n"
        );

        let failed = dir.path().join("failed.txt");
        write_failures(&failed, report.failures()).unwrap();
        assert_eq!(fs::read_to_string(&failed).unwrap(), "karen_S2_Potter_Givens_WC\n");
    }

    #[test]
    fn test_report_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = BatchReport::new();
        report.record_rejected(
            Some("ana"),
            "S3",
            &[SensorBank::Significant],
            &[variant()],
            "Invalid input: no rows",
        );
        report.finish();

        let path = dir.path().join("report.json");
        write_report_json(&path, &report).unwrap();
        let parsed: BatchReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].label, "ana_S3_Potter_Givens_WC");
        assert!(!parsed.entries[0].status.is_completed());
        assert!(parsed.finished_at.is_some());
    }
}
