//! Export per-age estimates to CSV and full run results to JSON.
//!
//! The CSV export is meant to be easy to consume in spreadsheets or
//! downstream scripts; the JSON export carries the complete machine-readable
//! result of a run.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::domain::{BreakpointAnalysis, DiagnosticsReport, PerAgeEstimate, TrajectoryModel};
use crate::error::AppError;

/// Machine-readable result of one full run.
#[derive(Debug, Serialize)]
pub struct RunExport<'a> {
    pub model: &'a TrajectoryModel,
    pub diagnostics: &'a DiagnosticsReport,
    pub per_age: &'a [PerAgeEstimate],
    pub breakpoint: Option<&'a BreakpointAnalysis>,
}

/// Write per-age estimates to a CSV file.
pub fn write_ages_csv(path: &Path, estimates: &[PerAgeEstimate]) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::data_format(format!(
            "Failed to create export CSV '{}': {e}",
            path.display()
        ))
    })?;

    writeln!(file, "age,effect,se,scaled")
        .map_err(|e| AppError::data_format(format!("Failed to write export CSV header: {e}")))?;

    for row in estimates {
        writeln!(
            file,
            "{},{:.10},{:.10},{:.10}",
            row.age, row.effect, row.se, row.scaled
        )
        .map_err(|e| AppError::data_format(format!("Failed to write export CSV row: {e}")))?;
    }

    Ok(())
}

/// Write the full run result to a JSON file.
pub fn write_run_json(path: &Path, export: &RunExport<'_>) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(export)
        .map_err(|e| AppError::internal(format!("Failed to serialize run JSON: {e}")))?;

    let mut file = File::create(path).map_err(|e| {
        AppError::data_format(format!(
            "Failed to create export JSON '{}': {e}",
            path.display()
        ))
    })?;
    file.write_all(json.as_bytes())
        .map_err(|e| AppError::data_format(format!("Failed to write export JSON: {e}")))?;

    Ok(())
}
