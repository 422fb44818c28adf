use crate::cache::write_atomic;
use crate::error::Result;
use crate::normalizer::parse_document;
use crate::pipeline::{FilterOutcome, RunReport};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files written for one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct RunFiles {
    pub relevant: PathBuf,
    pub not_relevant: PathBuf,
    pub errors: PathBuf,
    pub report: PathBuf,
}

/// Read a JSON document, reporting syntax errors with their byte offset
pub fn read_document(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)?;
    parse_document(&contents)
}

/// Pretty-print `value` to `path` via a temporary file and rename
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Persist the filter-result artifact
pub fn write_filter_results(path: &Path, outcome: &FilterOutcome) -> Result<()> {
    write_json(path, &outcome.to_document())?;
    info!("Wrote filter results to {}", path.display());
    Ok(())
}

/// Write the relevant, not relevant, errors and report files for a run
pub fn write_run(dir: &Path, run_id: &str, report: &RunReport) -> Result<RunFiles> {
    let path = |suffix: &str| dir.join(format!("analysis_{}_{}.json", run_id, suffix));
    let files = RunFiles {
        relevant: path("relevant"),
        not_relevant: path("not_relevant"),
        errors: path("errors"),
        report: path("report"),
    };

    write_json(&files.relevant, &report.relevant)?;
    write_json(&files.not_relevant, &report.not_relevant)?;
    write_json(&files.errors, &report.errored)?;
    write_json(&files.report, &report.summary())?;

    info!(
        "Saved run {} to {} ({} relevant, {} not relevant, {} errored)",
        run_id,
        dir.display(),
        report.relevant.len(),
        report.not_relevant.len(),
        report.errored.len()
    );
    Ok(files)
}

/// Run id derived from the report timestamp
pub fn default_run_id(report: &RunReport) -> String {
    report.generated_at.format("%Y%m%d_%H%M%S").to_string()
}
