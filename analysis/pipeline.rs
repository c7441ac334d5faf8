//! # End-to-End Trajectory Clustering
//!
//! Composes the stages in order: shared grid, interpolation, missing-aware
//! distances, gap-statistic count selection, final Ward cut. Every stage
//! takes its inputs as arguments and hands its outputs forward; nothing is
//! carried through shared state.
//!
//! `load_or_compute` layers the disk cache on top: an existing artifact is
//! reused only when its stored parameters and input fingerprint match the
//! request, otherwise the run is recomputed and the file rewritten.

use crate::artifact::{ArtifactError, ClusteringArtifact, InputFingerprint, PipelineParams};
use crate::data::PatientSeries;
use crate::distance::{DistancePolicy, pairwise};
use crate::gap::{GapError, GapParams, select_k};
use crate::hier::{ClusterError, ward_cut};
use crate::interp::{GridError, TimeGrid, TrajectoryMatrix, interpolate};
use std::path::Path;
use thiserror::Error;

/// A failure in any stage of the pipeline, or in the artifact cache
/// wrapped around it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Grid construction failed: {0}")]
    Grid(#[from] GridError),
    #[error("Cluster-count selection failed: {0}")]
    Gap(#[from] GapError),
    #[error("Hierarchical clustering failed: {0}")]
    Cluster(#[from] ClusterError),
    #[error("Artifact handling failed: {0}")]
    Artifact(#[from] ArtifactError),
}

/// How `load_or_compute` satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A valid artifact was on disk and reused.
    Hit,
    /// An artifact was on disk but described different parameters or
    /// inputs; it was recomputed and rewritten.
    Stale,
    /// No artifact existed yet.
    Miss,
}

/// Runs the full pipeline over the validated series.
pub fn cluster_trajectories(
    series: &[PatientSeries],
    params: &PipelineParams,
) -> Result<ClusteringArtifact, PipelineError> {
    let grid = TimeGrid::spanning(series, params.grid_step)?;
    log::info!(
        "Time grid: {} points over [{}, {}] at step {}",
        grid.len(),
        grid.start(),
        grid.end(),
        grid.step()
    );

    let traj = interpolate(series, &grid);
    let policy = DistancePolicy {
        min_overlap: params.min_overlap,
    };
    let dissimilarity = pairwise(&traj, &policy);

    let gap_result = select_k(
        &traj,
        &dissimilarity,
        &policy,
        &GapParams {
            k_max: params.k_max,
            bootstraps: params.bootstraps,
            seed: params.seed,
        },
    )?;

    let assignment = ward_cut(&dissimilarity, gap_result.selected_k)?;
    log::info!(
        "Assigned {} patients to {} clusters (sizes: {:?})",
        assignment.labels().len(),
        assignment.k(),
        assignment.sizes()
    );

    let cluster_means = cluster_means(&traj, assignment.labels(), assignment.k());

    Ok(ClusteringArtifact {
        grid: grid.points().to_vec(),
        selected_k: gap_result.selected_k,
        gap: gap_result.gap,
        std_err: gap_result.std_err,
        log_w_obs: gap_result.log_w_obs,
        log_w_ref_mean: gap_result.log_w_ref_mean,
        labels: assignment.labels().to_vec(),
        cluster_sizes: assignment.sizes(),
        cluster_means,
        params: *params,
        fingerprint: InputFingerprint::of(series),
    })
}

/// Returns a cached artifact when the file at `path` matches the request,
/// computing (and persisting) a fresh one otherwise.
pub fn load_or_compute(
    path: &Path,
    series: &[PatientSeries],
    params: &PipelineParams,
) -> Result<(ClusteringArtifact, CacheStatus), PipelineError> {
    let fingerprint = InputFingerprint::of(series);
    let status = if path.exists() {
        let cached = ClusteringArtifact::load(path)?;
        if cached.matches(params, &fingerprint) {
            log::info!("Reusing cached clustering artifact '{}'", path.display());
            return Ok((cached, CacheStatus::Hit));
        }
        log::warn!(
            "Artifact '{}' describes different parameters or inputs; recomputing",
            path.display()
        );
        CacheStatus::Stale
    } else {
        CacheStatus::Miss
    };

    let artifact = cluster_trajectories(series, params)?;
    artifact.save(path)?;
    Ok((artifact, status))
}

/// Missing-aware per-cluster mean trajectories: a grid point's mean is
/// taken over the cluster members observed there, and is NaN when no
/// member covers it.
fn cluster_means(traj: &TrajectoryMatrix, labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let m = traj.n_points();
    let mut means = vec![vec![f64::NAN; m]; k];
    for (r, mean_row) in means.iter_mut().enumerate() {
        let label = r + 1;
        for (c, slot) in mean_row.iter_mut().enumerate() {
            let mut sum = 0.0;
            let mut count = 0usize;
            for (patient, &l) in labels.iter().enumerate() {
                if l == label {
                    if let Some(v) = traj.value(patient, c) {
                        sum += v;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                *slot = sum / count as f64;
            }
        }
    }
    means
}
