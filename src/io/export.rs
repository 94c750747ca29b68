//! Result exports.
//!
//! - fitted profiles (one row per measured line) as CSV
//! - line records with abundances and flags as CSV
//! - stellar parameter estimates as JSON (readable back as a starting point)

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LineRecord, StellarParameters};
use crate::equilibrium::EquilibriumState;
use crate::error::AppError;
use crate::fit::FittedLines;
use crate::solve::{Status, StellarEstimate};

/// Portable summary of a `solve` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub status: Status,
    pub initial: StellarParameters,
    pub parameters: StellarParameters,
    pub state: EquilibriumState,
    pub evaluations: usize,
    pub lines_used: usize,
    pub outliers: usize,
}

impl EstimateFile {
    pub fn from_estimate(estimate: &StellarEstimate, created: DateTime<Utc>) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            created,
            status: estimate.status,
            initial: estimate.initial,
            parameters: estimate.parameters,
            state: estimate.state,
            evaluations: estimate.evaluations,
            lines_used: estimate.records.len(),
            outliers: estimate.initial_outcome.flagged,
        }
    }
}

fn create(path: &Path, what: &str) -> Result<File, AppError> {
    File::create(path).map_err(|e| AppError::new(2, format!("Failed to create {what} '{}': {e}", path.display())))
}

/// One row per fitted profile.
pub fn write_profiles_csv(path: &Path, fitted: &FittedLines) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(create(path, "profile export")?);
    let write_err = |e: csv::Error| AppError::new(2, format!("Failed to write profile export: {e}"));

    writer
        .write_record([
            "index",
            "wavelength",
            "species",
            "amplitude",
            "mean",
            "stddev",
            "equivalent_width",
            "blended",
            "outlier_profiles",
            "chi_sq",
        ])
        .map_err(write_err)?;
    for (index, fit) in &fitted.fits {
        let species = fitted
            .table
            .get(*index)
            .map(|t| t.species.to_string())
            .unwrap_or_default();
        writer
            .write_record([
                index.to_string(),
                format!("{:.4}", fit.wavelength),
                species,
                format!("{:.6}", fit.amplitude),
                format!("{:.4}", fit.mean),
                format!("{:.6}", fit.stddev),
                format!("{:.3}", fit.equivalent_width),
                fit.blended.to_string(),
                fit.outlier_means.len().to_string(),
                format!("{:.6e}", fit.chi_sq),
            ])
            .map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write profile export: {e}")))
}

/// Line records with abundances and selection flags.
pub fn write_records_csv(path: &Path, records: &[LineRecord]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(create(path, "record export")?);
    let write_err = |e: csv::Error| AppError::new(2, format!("Failed to write record export: {e}"));

    writer
        .write_record([
            "wavelength",
            "species",
            "excitation_potential",
            "loggf",
            "equivalent_width",
            "reduced_equivalent_width",
            "abundance",
            "is_filtered",
            "is_outlier",
        ])
        .map_err(write_err)?;
    for r in records {
        writer
            .write_record([
                format!("{:.4}", r.wavelength),
                r.species.to_string(),
                format!("{:.3}", r.excitation_potential),
                format!("{:.3}", r.loggf),
                finite_or_empty(r.equivalent_width, 3),
                finite_or_empty(r.reduced_equivalent_width(), 4),
                finite_or_empty(r.abundance, 4),
                r.is_filtered.to_string(),
                r.is_outlier.to_string(),
            ])
            .map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write record export: {e}")))
}

fn finite_or_empty(value: f64, decimals: usize) -> String {
    if value.is_finite() {
        format!("{value:.decimals$}")
    } else {
        String::new()
    }
}

pub fn write_estimate_json(path: &Path, estimate: &EstimateFile) -> Result<(), AppError> {
    let file = create(path, "estimate JSON")?;
    serde_json::to_writer_pretty(file, estimate)
        .map_err(|e| AppError::new(2, format!("Failed to write estimate JSON: {e}")))
}

pub fn read_estimate_json(path: &Path) -> Result<EstimateFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open estimate JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid estimate JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AtomicTransition;

    #[test]
    fn estimate_json_round_trip() {
        let file = EstimateFile {
            tool: "stellar-equilibria".to_string(),
            created: DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z").unwrap().with_timezone(&Utc),
            status: Status::Converged,
            initial: StellarParameters::new(5700.0, 4.3, -0.1, 1.0),
            parameters: StellarParameters::new(5771.5, 4.41, 0.02, 1.07),
            state: EquilibriumState {
                excitation_slope: 1e-6,
                ionisation_offset: -2e-6,
                abundance_offset: 3e-5,
                line_strength_slope: 4e-6,
            },
            evaluations: 23,
            lines_used: 110,
            outliers: 3,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimate.json");
        write_estimate_json(&path, &file).unwrap();
        assert_eq!(read_estimate_json(&path).unwrap(), file);
    }

    #[test]
    fn record_export_leaves_unknown_values_empty() {
        let mut record = LineRecord::from_transition(&AtomicTransition::new(5000.0, 26.0, 1.0, -1.0));
        record.is_filtered = true;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        write_records_csv(&path, &[record]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, "5000.0000,26.0,1.000,-1.000,,,,true,false");
    }
}
