//! # Persisted Clustering Results
//!
//! The structures here define the public, human-readable format of a
//! clustering run when serialized to a TOML file. The artifact embeds the
//! run parameters and a fingerprint of the input series; the caching layer
//! in `pipeline` only reuses an artifact whose stored parameters and
//! fingerprint both match the current request, so a stale file is
//! recomputed instead of trusted forever.

use crate::data::PatientSeries;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Explicit parameters of a full pipeline run. Every knob lives here; no
/// component reads hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Step between grid timepoints.
    pub grid_step: f64,
    /// Maximum candidate cluster count for the gap statistic.
    pub k_max: usize,
    /// Number of uniform reference datasets.
    pub bootstraps: usize,
    /// RNG seed for the reference resamples.
    pub seed: u64,
    /// Minimum shared grid points for a pairwise distance.
    pub min_overlap: usize,
}

/// Content-derived identity of the input series set, used to validate a
/// cached artifact against the data it claims to describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub n_patients: usize,
    pub patient_ids: Vec<String>,
    /// Observation count per patient, aligned with `patient_ids`.
    pub observations: Vec<usize>,
    /// Global `(first, last)` observed timepoints.
    pub time_span: (f64, f64),
}

impl InputFingerprint {
    pub fn of(series: &[PatientSeries]) -> Self {
        let start = series
            .iter()
            .map(|s| s.time_span().0)
            .fold(f64::INFINITY, f64::min);
        let end = series
            .iter()
            .map(|s| s.time_span().1)
            .fold(f64::NEG_INFINITY, f64::max);
        Self {
            n_patients: series.len(),
            patient_ids: series.iter().map(|s| s.id().to_string()).collect(),
            observations: series.iter().map(|s| s.len()).collect(),
            time_span: (start, end),
        }
    }
}

/// The top-level, self-contained result artifact of one clustering run.
/// Plain-value fields come first so the TOML writer emits them before the
/// parameter and fingerprint tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringArtifact {
    /// Grid timepoints the trajectories were aligned to.
    pub grid: Vec<f64>,
    /// Cluster count chosen by the gap statistic.
    pub selected_k: usize,
    /// Gap curve, indexed by `k - 1`.
    pub gap: Vec<f64>,
    pub std_err: Vec<f64>,
    pub log_w_obs: Vec<f64>,
    pub log_w_ref_mean: Vec<f64>,
    /// Labels in `1..=selected_k`, aligned with the fingerprint's
    /// `patient_ids`.
    pub labels: Vec<usize>,
    pub cluster_sizes: Vec<usize>,
    /// Per-cluster mean trajectory on the grid; NaN where no member of the
    /// cluster covers the grid point.
    pub cluster_means: Vec<Vec<f64>>,
    pub params: PipelineParams,
    pub fingerprint: InputFingerprint,
}

/// Custom error type for artifact loading and saving.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write artifact file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML artifact file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize artifact to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl ClusteringArtifact {
    /// Serializes the artifact to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let serialized = toml::to_string_pretty(self)?;
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(serialized.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Loads an artifact from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Whether this artifact describes the given request. Both the
    /// parameters and the input fingerprint must match for a cache hit.
    pub fn matches(&self, params: &PipelineParams, fingerprint: &InputFingerprint) -> bool {
        self.params == *params && self.fingerprint == *fingerprint
    }
}
