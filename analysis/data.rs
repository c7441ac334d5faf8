//! # Data Loading and Validation Module
//!
//! This module is the exclusive entry point for user-provided data. It reads
//! the long-format severity table (TSV), validates it against a strict,
//! predefined schema, and groups the rows into the immutable per-patient
//! series consumed by the rest of the pipeline.
//!
//! - Strict Schema: Column names are not configurable. The module enforces
//!   `patient_id`, `timepoint`, and `om_score`. The score column is produced
//!   upstream by the symptom dimensionality-reduction step; this crate never
//!   re-derives it.
//! - User-Centric Errors: Failures are assumed to be user-input errors. The
//!   `DataError` enum is designed to provide clear, actionable feedback.
//! - Ordering Contract: Timepoints must be strictly increasing within each
//!   patient. A violation (including a duplicated timepoint) is reported as
//!   an error, never sorted away.

use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Minimum number of patient series required downstream; a dissimilarity
/// matrix over fewer than two patients carries no information.
const MINIMUM_PATIENTS: usize = 2;

/// An immutable, validated severity time series for one patient.
#[derive(Debug, Clone)]
pub struct PatientSeries {
    id: String,
    timepoints: Array1<f64>,
    scores: Array1<f64>,
}

impl PatientSeries {
    /// Builds a series after validating the data contract: equal lengths,
    /// at least one observation, finite values, strictly increasing
    /// timepoints.
    pub fn new(
        id: impl Into<String>,
        timepoints: Vec<f64>,
        scores: Vec<f64>,
    ) -> Result<Self, DataError> {
        let id = id.into();
        if timepoints.len() != scores.len() {
            return Err(DataError::LengthMismatch {
                patient: id,
                timepoints: timepoints.len(),
                scores: scores.len(),
            });
        }
        if timepoints.is_empty() {
            return Err(DataError::EmptySeries { patient: id });
        }
        if timepoints.iter().chain(scores.iter()).any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteSeriesValue { patient: id });
        }
        for i in 1..timepoints.len() {
            if timepoints[i] <= timepoints[i - 1] {
                return Err(DataError::NonIncreasingTimepoints {
                    patient: id,
                    observation: i,
                });
            }
        }
        Ok(Self {
            id,
            timepoints: Array1::from_vec(timepoints),
            scores: Array1::from_vec(scores),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.timepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timepoints.is_empty()
    }

    pub fn timepoints(&self) -> ArrayView1<'_, f64> {
        self.timepoints.view()
    }

    pub fn scores(&self) -> ArrayView1<'_, f64> {
        self.scores.view()
    }

    /// The observed `(first, last)` timepoints. Equal for a single-point
    /// series.
    pub fn time_span(&self) -> (f64, f64) {
        (
            self.timepoints[0],
            self.timepoints[self.timepoints.len() - 1],
        )
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error(
        "Timepoints for patient '{patient}' are not strictly increasing at observation {observation}. Duplicate or out-of-order rows must be fixed upstream, not silently reordered here."
    )]
    NonIncreasingTimepoints { patient: String, observation: usize },
    #[error("Patient '{patient}' has no usable observations.")]
    EmptySeries { patient: String },
    #[error(
        "Patient '{patient}' has {timepoints} timepoints but {scores} scores; the series columns are inconsistent."
    )]
    LengthMismatch {
        patient: String,
        timepoints: usize,
        scores: usize,
    },
    #[error("Series for patient '{patient}' contains non-finite values.")]
    NonFiniteSeriesValue { patient: String },
    #[error(
        "Input file contains only {found} distinct patients, but at least {required} are required for trajectory clustering."
    )]
    TooFewPatients { found: usize, required: usize },
}

/// Loads the severity table and returns one validated series per patient,
/// ordered by first appearance in the file.
pub fn load_patient_series(path: &str) -> Result<Vec<PatientSeries>, DataError> {
    let df = read_table(path)?;

    let ids = extract_string_column(&df, "patient_id")?;
    let timepoints = extract_numeric_column(&df, "timepoint")?;
    let scores = extract_numeric_column(&df, "om_score")?;

    // Group rows by patient, preserving both file order of patients and
    // file order of observations within each patient.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: std::collections::HashMap<String, (Vec<f64>, Vec<f64>)> =
        std::collections::HashMap::new();
    for ((id, &t), &s) in ids.iter().zip(timepoints.iter()).zip(scores.iter()) {
        let entry = grouped.entry(id.clone()).or_insert_with(|| {
            order.push(id.clone());
            (Vec::new(), Vec::new())
        });
        entry.0.push(t);
        entry.1.push(s);
    }

    if order.len() < MINIMUM_PATIENTS {
        return Err(DataError::TooFewPatients {
            found: order.len(),
            required: MINIMUM_PATIENTS,
        });
    }

    let mut series = Vec::with_capacity(order.len());
    for id in order {
        let (t, s) = grouped.remove(&id).expect("grouped entry exists for id");
        series.push(PatientSeries::new(id, t, s)?);
    }

    log::info!(
        "Loaded {} observations across {} patients from '{}'",
        ids.len(),
        series.len(),
        path
    );
    Ok(series)
}

fn read_table(path: &str) -> Result<DataFrame, DataError> {
    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let columns_set: std::collections::HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for col_name in ["patient_id", "timepoint", "om_score"] {
        if !columns_set.contains(col_name) {
            return Err(DataError::ColumnNotFound(col_name.to_string()));
        }
    }
    Ok(df)
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

fn extract_string_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::String) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "string",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    let chunked = casted.str()?.rechunk();
    let values: Vec<String> = chunked
        .into_no_null_iter()
        .map(|s| s.to_string())
        .collect();
    Ok(values)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    /// A robust helper to create a temporary TSV file for testing.
    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    const HEADER: &str = "patient_id\ttimepoint\tom_score";

    fn rows(lines: &[&str]) -> String {
        format!("{}\n{}", HEADER, lines.join("\n"))
    }

    #[test]
    fn test_load_success_preserves_order() {
        let content = rows(&[
            "P2\t0\t1.5",
            "P2\t7\t2.5",
            "P1\t0\t0.5",
            "P2\t14\t1.0",
            "P1\t7\t0.8",
        ]);
        let file = create_test_tsv(&content).unwrap();
        let series = load_patient_series(file.path().to_str().unwrap()).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].id(), "P2");
        assert_eq!(series[1].id(), "P1");
        assert_eq!(series[0].len(), 3);
        assert_eq!(series[1].len(), 2);
        assert_abs_diff_eq!(series[0].scores()[1], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(series[1].timepoints()[1], 7.0, epsilon = 1e-12);
        assert_eq!(series[0].time_span(), (0.0, 14.0));
    }

    #[test]
    fn test_numeric_patient_ids_are_accepted() {
        let content = rows(&["101\t0\t1.0", "101\t7\t2.0", "102\t0\t0.5", "102\t7\t0.9"]);
        let file = create_test_tsv(&content).unwrap();
        let series = load_patient_series(file.path().to_str().unwrap()).unwrap();
        assert_eq!(series[0].id(), "101");
        assert_eq!(series[1].id(), "102");
    }

    #[test]
    fn test_error_column_not_found() {
        let content = format!("patient_id\ttimepoint\n{}", "P1\t0");
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::ColumnNotFound(col) => assert_eq!(col, "om_score"),
            other => panic!("Expected ColumnNotFound(om_score), got {:?}", other),
        }
    }

    #[test]
    fn test_error_missing_values() {
        let content = rows(&["P1\t0\t1.0", "P1\t7\t", "P2\t0\t0.5", "P2\t7\t0.9"]);
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::MissingValuesFound(col) => assert_eq!(col, "om_score"),
            other => panic!("Expected MissingValuesFound(om_score), got {:?}", other),
        }
    }

    #[test]
    fn test_error_wrong_type() {
        let content = rows(&[
            "P1\t0\t1.0",
            "P1\t7\tsevere",
            "P2\t0\t0.5",
            "P2\t7\t0.9",
        ]);
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "om_score"),
            other => panic!("Expected ColumnWrongType(om_score), got {:?}", other),
        }
    }

    #[test]
    fn test_error_non_finite_score() {
        let content = rows(&["P1\t0\t1.0", "P1\t7\tNaN", "P2\t0\t0.5", "P2\t7\t0.9"]);
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::NonFiniteValuesFound(col) => assert_eq!(col, "om_score"),
            other => panic!("Expected NonFiniteValuesFound(om_score), got {:?}", other),
        }
    }

    #[test]
    fn test_error_non_increasing_timepoints() {
        let content = rows(&["P1\t0\t1.0", "P1\t7\t2.0", "P1\t7\t2.5", "P2\t0\t0.5", "P2\t7\t1.0"]);
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::NonIncreasingTimepoints {
                patient,
                observation,
            } => {
                assert_eq!(patient, "P1");
                assert_eq!(observation, 2);
            }
            other => panic!("Expected NonIncreasingTimepoints, got {:?}", other),
        }
    }

    #[test]
    fn test_error_out_of_order_timepoints() {
        let content = rows(&["P1\t7\t1.0", "P1\t0\t2.0", "P2\t0\t0.5", "P2\t7\t1.0"]);
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, DataError::NonIncreasingTimepoints { .. }));
    }

    #[test]
    fn test_error_too_few_patients() {
        let content = rows(&["P1\t0\t1.0", "P1\t7\t2.0"]);
        let file = create_test_tsv(&content).unwrap();
        let err = load_patient_series(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::TooFewPatients { found, required } => {
                assert_eq!(found, 1);
                assert_eq!(required, 2);
            }
            other => panic!("Expected TooFewPatients, got {:?}", other),
        }
    }

    #[test]
    fn test_series_constructor_rejects_empty() {
        let err = PatientSeries::new("P1", vec![], vec![]).unwrap_err();
        assert!(matches!(err, DataError::EmptySeries { .. }));
    }

    #[test]
    fn test_series_constructor_rejects_length_mismatch() {
        let err = PatientSeries::new("P1", vec![0.0, 1.0], vec![2.0]).unwrap_err();
        assert!(matches!(err, DataError::LengthMismatch { .. }));
    }

    #[test]
    fn test_single_point_series_is_valid() {
        let s = PatientSeries::new("P1", vec![3.0], vec![1.5]).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.time_span(), (3.0, 3.0));
    }
}
