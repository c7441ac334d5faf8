//! # Gap-Statistic Cluster-Count Selection
//!
//! Chooses the number of trajectory clusters by comparing the observed
//! within-cluster dispersion curve against the dispersion expected under a
//! structureless null: B reference datasets drawn uniformly over each grid
//! column's observed bounding range, each preserving the patients'
//! missingness patterns so the reference passes through the identical
//! missing-aware distance and Ward path as the real data.
//!
//! The selection rule is the one-standard-error rule against the maximum
//! observed gap: the smallest k whose gap reaches `max_gap - se(max_gap)`.
//! The RNG seed is a required input; identical seed and inputs reproduce
//! the identical selection.

use crate::distance::{DistancePolicy, DissimilarityMatrix, pairwise};
use crate::hier::{WardDendrogram, within_dispersion};
use crate::interp::TrajectoryMatrix;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Dispersions of zero (singleton-only cuts) are floored here before the
/// logarithm so the gap stays finite; a cut that is degenerate in both the
/// observed and the reference data then contributes a gap of exactly zero.
const LOG_FLOOR: f64 = f64::MIN_POSITIVE;

#[derive(Error, Debug)]
pub enum GapError {
    #[error("K_max was {k_max}, but must lie in 1..={n} for {n} patients.")]
    InvalidKMax { k_max: usize, n: usize },
    #[error("At least one bootstrap reference sample is required.")]
    NoBootstraps,
    #[error(
        "Patients '{a}' and '{b}' share too few grid points for a distance; the gap statistic cannot be computed."
    )]
    InsufficientOverlap { a: String, b: String },
}

/// Explicit parameters of the selection procedure. The seed has no default
/// anywhere in this crate; callers must supply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapParams {
    pub k_max: usize,
    pub bootstraps: usize,
    pub seed: u64,
}

/// The gap curve and the selected cluster count. Vectors are indexed by
/// `k - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct GapResult {
    pub selected_k: usize,
    pub gap: Vec<f64>,
    pub std_err: Vec<f64>,
    pub log_w_obs: Vec<f64>,
    pub log_w_ref_mean: Vec<f64>,
}

/// Computes the gap statistic for every k in `1..=k_max` and applies the
/// one-standard-error rule.
pub fn select_k(
    traj: &TrajectoryMatrix,
    observed: &DissimilarityMatrix,
    policy: &DistancePolicy,
    params: &GapParams,
) -> Result<GapResult, GapError> {
    let n = traj.n_patients();
    if params.k_max == 0 || params.k_max > n {
        return Err(GapError::InvalidKMax {
            k_max: params.k_max,
            n,
        });
    }
    if params.bootstraps == 0 {
        return Err(GapError::NoBootstraps);
    }
    if let Some((i, j)) = observed.first_undefined_pair() {
        return Err(GapError::InsufficientOverlap {
            a: observed.ids()[i].clone(),
            b: observed.ids()[j].clone(),
        });
    }

    let log_w_obs = dispersion_curve(&observed.squared(), params.k_max);

    // Per-column bounds over the defined entries; columns no patient covers
    // stay unsampled (their mask is all false in every reference draw too).
    let bounds = column_bounds(traj);

    // Reference overlap pattern equals the observed pattern because the
    // masks are preserved, so pairwise() cannot introduce new undefined
    // pairs here.
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut log_w_ref = vec![Vec::with_capacity(params.bootstraps); params.k_max];
    for _ in 0..params.bootstraps {
        let reference = sample_reference(traj, &bounds, &mut rng);
        let d_ref = pairwise(&reference, policy);
        let curve = dispersion_curve(&d_ref.squared(), params.k_max);
        for (k_idx, &v) in curve.iter().enumerate() {
            log_w_ref[k_idx].push(v);
        }
    }

    let b = params.bootstraps as f64;
    let mut gap = Vec::with_capacity(params.k_max);
    let mut std_err = Vec::with_capacity(params.k_max);
    let mut log_w_ref_mean = Vec::with_capacity(params.k_max);
    for k_idx in 0..params.k_max {
        let mean = log_w_ref[k_idx].iter().sum::<f64>() / b;
        let var = log_w_ref[k_idx]
            .iter()
            .map(|&v| (v - mean) * (v - mean))
            .sum::<f64>()
            / b;
        log_w_ref_mean.push(mean);
        gap.push(mean - log_w_obs[k_idx]);
        std_err.push(var.sqrt() * (1.0 + 1.0 / b).sqrt());
    }

    // One-SE rule against the maximum gap: first max on ties, then the
    // smallest k reaching max_gap - se(argmax).
    let mut k_best = 0usize;
    for k_idx in 1..params.k_max {
        if gap[k_idx] > gap[k_best] {
            k_best = k_idx;
        }
    }
    let threshold = gap[k_best] - std_err[k_best];
    let selected_k = gap
        .iter()
        .position(|&g| g >= threshold)
        .map(|k_idx| k_idx + 1)
        .expect("the maximal gap itself reaches the threshold");

    log::info!(
        "Gap statistic selected k={} (max gap {:.4} at k={}, threshold {:.4})",
        selected_k,
        gap[k_best],
        k_best + 1,
        threshold
    );

    Ok(GapResult {
        selected_k,
        gap,
        std_err,
        log_w_obs,
        log_w_ref_mean,
    })
}

/// `log W_k` for every k in `1..=k_max`, from one dendrogram built over the
/// squared distances.
fn dispersion_curve(squared: &Array2<f64>, k_max: usize) -> Vec<f64> {
    let dendrogram = WardDendrogram::build(squared);
    (1..=k_max)
        .map(|k| {
            let labels = dendrogram.cut(k);
            within_dispersion(squared, &labels, k).max(LOG_FLOOR).ln()
        })
        .collect()
}

/// Per-column `(min, max)` over the defined entries; `None` for columns no
/// patient covers.
fn column_bounds(traj: &TrajectoryMatrix) -> Vec<Option<(f64, f64)>> {
    let values = traj.values_masked();
    let mask = traj.defined();
    (0..traj.n_points())
        .map(|c| {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            let mut any = false;
            for r in 0..traj.n_patients() {
                if mask[[r, c]] {
                    lo = lo.min(values[[r, c]]);
                    hi = hi.max(values[[r, c]]);
                    any = true;
                }
            }
            if any { Some((lo, hi)) } else { None }
        })
        .collect()
}

/// Draws one null dataset: uniform values over each column's bounding
/// range, defined exactly where the observed matrix is defined.
fn sample_reference(
    traj: &TrajectoryMatrix,
    bounds: &[Option<(f64, f64)>],
    rng: &mut StdRng,
) -> TrajectoryMatrix {
    let mut reference = traj.clone();
    for r in 0..traj.n_patients() {
        for c in 0..traj.n_points() {
            if !traj.is_defined(r, c) {
                continue;
            }
            let (lo, hi) = bounds[c].expect("defined cell implies covered column");
            let v = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
            reference.set_value(r, c, v);
        }
    }
    reference
}
