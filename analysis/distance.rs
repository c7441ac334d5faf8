//! # Missing-Aware Pairwise Dissimilarity
//!
//! Distances between interpolated trajectories are computed only over the
//! grid columns where both patients are observed, and are normalized by the
//! overlap size (root-mean-square over the shared columns). Without that
//! normalization a raw sum of squares grows with overlap size, biasing the
//! matrix toward pairs of long-followed patients.
//!
//! A pair with fewer than `min_overlap` shared columns has no defined
//! distance. The sentinel is carried as an unset mask entry (the value slot
//! holds NaN) and is only reachable through [`DissimilarityMatrix::get`],
//! which returns `None`. Consumers must treat that as "no information";
//! the clustering entry points reject matrices containing undefined pairs
//! rather than coercing them to zero or to a maximal distance.

use crate::interp::TrajectoryMatrix;
use itertools::Itertools;
use ndarray::Array2;

/// Overlap policy for pairwise distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistancePolicy {
    /// Minimum number of shared defined columns for a distance to exist.
    /// The default of 2 means a single shared point is reported as
    /// undefined, never silently turned into a distance.
    pub min_overlap: usize,
}

impl Default for DistancePolicy {
    fn default() -> Self {
        Self { min_overlap: 2 }
    }
}

/// Symmetric, zero-diagonal dissimilarity matrix with an explicit
/// defined-mask for pairs lacking overlap.
#[derive(Debug, Clone)]
pub struct DissimilarityMatrix {
    ids: Vec<String>,
    values: Array2<f64>,
    defined: Array2<bool>,
}

impl DissimilarityMatrix {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of patients (matrix is `n x n`).
    pub fn n(&self) -> usize {
        self.values.nrows()
    }

    /// The distance between patients `i` and `j`, or `None` when their
    /// observed spans share fewer than the configured number of columns.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if self.defined[[i, j]] {
            Some(self.values[[i, j]])
        } else {
            None
        }
    }

    pub fn is_fully_defined(&self) -> bool {
        self.defined.iter().all(|&d| d)
    }

    /// The lexicographically first `(i, j)` pair with no defined distance.
    pub fn first_undefined_pair(&self) -> Option<(usize, usize)> {
        let n = self.n();
        (0..n)
            .tuple_combinations()
            .find(|&(i, j)| !self.defined[[i, j]])
    }

    /// Squared distances for linkage. Caller must have established that the
    /// matrix is fully defined.
    pub(crate) fn squared(&self) -> Array2<f64> {
        self.values.mapv(|v| v * v)
    }
}

/// Computes the pairwise dissimilarity matrix over the interpolated
/// trajectories.
pub fn pairwise(traj: &TrajectoryMatrix, policy: &DistancePolicy) -> DissimilarityMatrix {
    let n = traj.n_patients();
    let m = traj.n_points();
    let values = traj.values_masked();
    let mask = traj.defined();

    let mut dist = Array2::from_elem((n, n), f64::NAN);
    let mut defined = Array2::from_elem((n, n), false);
    for i in 0..n {
        dist[[i, i]] = 0.0;
        defined[[i, i]] = true;
    }

    let mut undefined_pairs = 0usize;
    for (i, j) in (0..n).tuple_combinations() {
        let mut overlap = 0usize;
        let mut sum_sq = 0.0;
        for c in 0..m {
            if mask[[i, c]] && mask[[j, c]] {
                let diff = values[[i, c]] - values[[j, c]];
                sum_sq += diff * diff;
                overlap += 1;
            }
        }
        if overlap >= policy.min_overlap.max(1) {
            let d = (sum_sq / overlap as f64).sqrt();
            dist[[i, j]] = d;
            dist[[j, i]] = d;
            defined[[i, j]] = true;
            defined[[j, i]] = true;
        } else {
            undefined_pairs += 1;
        }
    }

    if undefined_pairs > 0 {
        log::warn!(
            "{} of {} patient pairs have fewer than {} overlapping grid points and carry no distance",
            undefined_pairs,
            n * (n - 1) / 2,
            policy.min_overlap
        );
    }

    DissimilarityMatrix {
        ids: traj.ids().to_vec(),
        values: dist,
        defined,
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PatientSeries;
    use crate::interp::{TimeGrid, interpolate};
    use approx::assert_abs_diff_eq;

    fn traj_from(series: Vec<PatientSeries>, step: f64) -> TrajectoryMatrix {
        let grid = TimeGrid::spanning(&series, step).unwrap();
        interpolate(&series, &grid)
    }

    fn series(id: &str, t: &[f64], y: &[f64]) -> PatientSeries {
        PatientSeries::new(id, t.to_vec(), y.to_vec()).unwrap()
    }

    #[test]
    fn test_symmetric_zero_diagonal() {
        let traj = traj_from(
            vec![
                series("A", &[0.0, 2.0, 4.0], &[1.0, 2.0, 3.0]),
                series("B", &[0.0, 2.0, 4.0], &[2.0, 2.0, 2.0]),
                series("C", &[0.0, 2.0, 4.0], &[5.0, 4.0, 3.0]),
            ],
            2.0,
        );
        let d = pairwise(&traj, &DistancePolicy::default());
        assert!(d.is_fully_defined());
        for i in 0..3 {
            assert_abs_diff_eq!(d.get(i, i).unwrap(), 0.0, epsilon = 1e-12);
            for j in 0..3 {
                assert_abs_diff_eq!(
                    d.get(i, j).unwrap(),
                    d.get(j, i).unwrap(),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_rms_normalization_over_overlap() {
        // Constant offset of 2 over every shared column: RMS distance is 2
        // regardless of how many columns overlap.
        let traj = traj_from(
            vec![
                series("A", &[0.0, 4.0], &[1.0, 1.0]),
                series("B", &[0.0, 4.0], &[3.0, 3.0]),
            ],
            1.0,
        );
        let d = pairwise(&traj, &DistancePolicy::default());
        assert_abs_diff_eq!(d.get(0, 1).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_uses_only_shared_columns() {
        // A covers [0, 4], B covers [2, 6]; the shared block is [2, 4].
        // Values differ by 1 at t=2,3 and by 4 at t=4.
        let traj = traj_from(
            vec![
                series("A", &[0.0, 4.0], &[0.0, 0.0]),
                series("B", &[2.0, 6.0], &[1.0, 9.0]),
                series("C", &[0.0, 6.0], &[0.0, 0.0]),
            ],
            1.0,
        );
        let d = pairwise(&traj, &DistancePolicy::default());
        // B at t=2,3,4 is 1, 3, 5; A is 0 there.
        let expected = ((1.0 + 9.0 + 25.0) / 3.0_f64).sqrt();
        assert_abs_diff_eq!(d.get(0, 1).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_single_overlap_column_is_undefined() {
        // A covers [0, 2], B covers [2, 4]: exactly one shared grid point.
        let traj = traj_from(
            vec![
                series("A", &[0.0, 2.0], &[0.0, 1.0]),
                series("B", &[2.0, 4.0], &[5.0, 6.0]),
            ],
            1.0,
        );
        let d = pairwise(&traj, &DistancePolicy::default());
        assert_eq!(d.get(0, 1), None);
        assert_eq!(d.get(1, 0), None);
        assert!(!d.is_fully_defined());
        assert_eq!(d.first_undefined_pair(), Some((0, 1)));
        // Diagonal stays defined and zero.
        assert_abs_diff_eq!(d.get(0, 0).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_overlap_is_undefined() {
        let traj = traj_from(
            vec![
                series("A", &[0.0, 1.0], &[0.0, 1.0]),
                series("B", &[5.0, 6.0], &[5.0, 6.0]),
            ],
            1.0,
        );
        let d = pairwise(&traj, &DistancePolicy::default());
        assert_eq!(d.get(0, 1), None);
    }

    #[test]
    fn test_min_overlap_one_allows_single_column() {
        let traj = traj_from(
            vec![
                series("A", &[0.0, 2.0], &[0.0, 1.0]),
                series("B", &[2.0, 4.0], &[5.0, 6.0]),
            ],
            1.0,
        );
        let d = pairwise(&traj, &DistancePolicy { min_overlap: 1 });
        // Explicitly configured: one shared column at t=2, |1 - 5| = 4.
        assert_abs_diff_eq!(d.get(0, 1).unwrap(), 4.0, epsilon = 1e-12);
    }
}
