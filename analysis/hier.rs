//! # Ward Hierarchical Clustering
//!
//! Agglomerative clustering of the patient dissimilarity matrix using
//! Ward's minimum-variance criterion in its conventional squared-distance
//! formulation, updated with the Lance-Williams recurrence. Merge ties are
//! broken lexicographically by (row, column) index, so the dendrogram and
//! every cut of it are reproducible for identical input.

use crate::distance::DissimilarityMatrix;
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Cannot cluster an empty dissimilarity matrix.")]
    Empty,
    #[error("Requested cluster count must be at least 1.")]
    ZeroClusters,
    #[error("Requested {requested} clusters but only {available} patients are available.")]
    TooManyClusters { requested: usize, available: usize },
    #[error(
        "Patients '{a}' and '{b}' share too few grid points for a distance; clustering cannot proceed. Widen the grid step or lower the overlap requirement."
    )]
    InsufficientOverlap { a: String, b: String },
}

/// One cluster label per patient, in the matrix's patient order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    ids: Vec<String>,
    labels: Vec<usize>,
    k: usize,
}

impl ClusterAssignment {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Labels in `1..=k`, aligned with [`ClusterAssignment::ids`].
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Member count per label, index `r` holding the size of cluster
    /// `r + 1`.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.k];
        for &l in &self.labels {
            sizes[l - 1] += 1;
        }
        sizes
    }
}

/// The recorded merge sequence of a Ward agglomeration. Merge order does not
/// depend on where the tree is cut, so the dendrogram is built once and cut
/// at every candidate k.
pub(crate) struct WardDendrogram {
    n: usize,
    /// `(keep, absorbed)` slot pairs in merge order; `keep < absorbed`, and
    /// a slot index always equals the smallest original member of its
    /// cluster.
    merges: Vec<(usize, usize)>,
}

impl WardDendrogram {
    /// Builds the dendrogram from a fully defined matrix of squared
    /// distances.
    pub(crate) fn build(squared: &Array2<f64>) -> Self {
        let n = squared.nrows();
        let mut d2 = squared.clone();
        let mut active = vec![true; n];
        let mut size = vec![1.0f64; n];
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        for _ in 1..n {
            // Smallest inter-cluster Ward cost; strict `<` over an ascending
            // (i, j) scan keeps the lexicographically first pair on ties.
            let mut best: Option<(usize, usize)> = None;
            let mut best_cost = f64::INFINITY;
            for i in 0..n {
                if !active[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if !active[j] {
                        continue;
                    }
                    if d2[[i, j]] < best_cost {
                        best_cost = d2[[i, j]];
                        best = Some((i, j));
                    }
                }
            }
            let (a, b) = best.expect("at least two active clusters remain");

            // Lance-Williams update for Ward linkage against every other
            // active cluster, using pre-merge sizes.
            for m in 0..n {
                if !active[m] || m == a || m == b {
                    continue;
                }
                let updated = ((size[a] + size[m]) * d2[[a, m]]
                    + (size[b] + size[m]) * d2[[b, m]]
                    - size[m] * best_cost)
                    / (size[a] + size[b] + size[m]);
                d2[[a, m]] = updated;
                d2[[m, a]] = updated;
            }

            size[a] += size[b];
            active[b] = false;
            merges.push((a, b));
        }

        Self { n, merges }
    }

    /// Labels in `1..=k` after replaying the first `n - k` merges. Labels
    /// are assigned in order of each cluster's smallest member index.
    pub(crate) fn cut(&self, k: usize) -> Vec<usize> {
        debug_assert!(k >= 1 && k <= self.n);
        let mut parent: Vec<usize> = (0..self.n).collect();
        for &(keep, absorbed) in &self.merges[..self.n - k] {
            parent[absorbed] = keep;
        }

        let root_of = |mut x: usize| {
            while parent[x] != x {
                x = parent[x];
            }
            x
        };

        // Roots are smallest-member indices, so ascending root order is the
        // required label order.
        let mut label_of_root = vec![0usize; self.n];
        let mut next_label = 0usize;
        let mut labels = vec![0usize; self.n];
        for x in 0..self.n {
            let r = root_of(x);
            if r == x {
                next_label += 1;
                label_of_root[r] = next_label;
            }
            labels[x] = label_of_root[r];
        }
        debug_assert_eq!(next_label, k);
        labels
    }
}

/// Pooled within-cluster dispersion `W = sum_r D_r / (2 n_r)` over squared
/// distances, with `D_r` the ordered-pair sum inside cluster `r`.
pub(crate) fn within_dispersion(squared: &Array2<f64>, labels: &[usize], k: usize) -> f64 {
    let mut pair_sums = vec![0.0f64; k];
    let mut sizes = vec![0usize; k];
    for (i, &li) in labels.iter().enumerate() {
        sizes[li - 1] += 1;
        for (j, &lj) in labels.iter().enumerate().skip(i + 1) {
            if li == lj {
                pair_sums[li - 1] += squared[[i, j]];
            }
        }
    }
    pair_sums
        .iter()
        .zip(sizes.iter())
        .map(|(&s, &n_r)| if n_r > 0 { s / n_r as f64 } else { 0.0 })
        .sum()
}

/// Clusters the dissimilarity matrix with Ward linkage and cuts the
/// dendrogram at exactly `k` clusters.
pub fn ward_cut(d: &DissimilarityMatrix, k: usize) -> Result<ClusterAssignment, ClusterError> {
    let n = d.n();
    if n == 0 {
        return Err(ClusterError::Empty);
    }
    if k == 0 {
        return Err(ClusterError::ZeroClusters);
    }
    if k > n {
        return Err(ClusterError::TooManyClusters {
            requested: k,
            available: n,
        });
    }
    if let Some((i, j)) = d.first_undefined_pair() {
        return Err(ClusterError::InsufficientOverlap {
            a: d.ids()[i].clone(),
            b: d.ids()[j].clone(),
        });
    }

    let labels = WardDendrogram::build(&d.squared()).cut(k);
    Ok(ClusterAssignment {
        ids: d.ids().to_vec(),
        labels,
        k,
    })
}
