//! # Time Grid and Trajectory Interpolation
//!
//! Aligns every patient's irregularly sampled severity series onto one
//! shared time grid. Interpolation is strictly piecewise-linear between a
//! patient's own observations; grid points outside the patient's observed
//! span are marked missing rather than extrapolated, so the defined entries
//! of each row always form a single contiguous block.

use crate::data::PatientSeries;
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Grid step must be positive and finite, but was {0}.")]
    InvalidStep(f64),
    #[error("Cannot construct a time grid over an empty set of patient series.")]
    NoSeries,
}

/// A shared, read-only grid of timepoints spanning the global observed range
/// at a fixed step.
#[derive(Debug, Clone)]
pub struct TimeGrid {
    points: Array1<f64>,
    step: f64,
}

impl TimeGrid {
    /// Builds the grid from the global minimum to the global maximum
    /// observed timepoint. The final point is clamped to the maximum so
    /// every observation lies inside the grid span even when the span is
    /// not a whole multiple of the step.
    pub fn spanning(series: &[PatientSeries], step: f64) -> Result<Self, GridError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(GridError::InvalidStep(step));
        }
        if series.is_empty() {
            return Err(GridError::NoSeries);
        }

        let start = series
            .iter()
            .map(|s| s.time_span().0)
            .fold(f64::INFINITY, f64::min);
        let end = series
            .iter()
            .map(|s| s.time_span().1)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut points = Vec::new();
        let mut i = 0usize;
        loop {
            let t = start + (i as f64) * step;
            if t > end {
                break;
            }
            points.push(t);
            i += 1;
        }
        // Tolerance absorbs the accumulated rounding of start + i*step.
        let tol = step * 1e-9;
        if end - points[points.len() - 1] > tol {
            points.push(end);
        }

        Ok(Self {
            points: Array1::from_vec(points),
            step,
        })
    }

    pub fn points(&self) -> ArrayView1<'_, f64> {
        self.points.view()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn start(&self) -> f64 {
        self.points[0]
    }

    pub fn end(&self) -> f64 {
        self.points[self.points.len() - 1]
    }
}

/// Patient trajectories aligned to a shared grid, with an explicit
/// defined-mask. Undefined slots hold NaN so any access that bypasses the
/// mask poisons its result instead of passing for data.
#[derive(Debug, Clone)]
pub struct TrajectoryMatrix {
    ids: Vec<String>,
    values: Array2<f64>,
    defined: Array2<bool>,
    grid: TimeGrid,
}

impl TrajectoryMatrix {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn n_patients(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_points(&self) -> usize {
        self.values.ncols()
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// The interpolated value at `(patient, grid point)`, or `None` if the
    /// grid point lies outside the patient's observed span.
    pub fn value(&self, patient: usize, point: usize) -> Option<f64> {
        if self.defined[[patient, point]] {
            Some(self.values[[patient, point]])
        } else {
            None
        }
    }

    pub fn is_defined(&self, patient: usize, point: usize) -> bool {
        self.defined[[patient, point]]
    }

    pub(crate) fn defined(&self) -> &Array2<bool> {
        &self.defined
    }

    /// Overwrites a defined slot. Used by the gap-statistic reference
    /// sampler, which redraws values while preserving the mask.
    pub(crate) fn set_value(&mut self, patient: usize, point: usize, value: f64) {
        debug_assert!(self.defined[[patient, point]]);
        self.values[[patient, point]] = value;
    }

    pub(crate) fn values_masked(&self) -> &Array2<f64> {
        &self.values
    }
}

/// Interpolates every series onto the grid. Series are already validated by
/// the data layer (finite values, strictly increasing timepoints), so this
/// step cannot fail.
pub fn interpolate(series: &[PatientSeries], grid: &TimeGrid) -> TrajectoryMatrix {
    let n = series.len();
    let m = grid.len();
    let mut values = Array2::from_elem((n, m), f64::NAN);
    let mut defined = Array2::from_elem((n, m), false);

    for (row, patient) in series.iter().enumerate() {
        let t = patient.timepoints();
        let y = patient.scores();
        let (t_min, t_max) = patient.time_span();

        // Index of the segment whose left endpoint is <= the current grid
        // point. Grid points are ascending, so this only moves forward.
        let mut seg = 0usize;
        for (col, &g) in grid.points().iter().enumerate() {
            if g < t_min || g > t_max {
                continue;
            }
            if patient.len() == 1 {
                // Zero-width observed range: defined only where the grid
                // lands exactly on the sole observation.
                if g == t_min {
                    values[[row, col]] = y[0];
                    defined[[row, col]] = true;
                }
                continue;
            }
            while seg + 2 < t.len() && t[seg + 1] <= g {
                seg += 1;
            }
            values[[row, col]] = lerp(t[seg], y[seg], t[seg + 1], y[seg + 1], g);
            defined[[row, col]] = true;
        }
    }

    TrajectoryMatrix {
        ids: series.iter().map(|s| s.id().to_string()).collect(),
        values,
        defined,
        grid: grid.clone(),
    }
}

/// Linear interpolation on the segment `[(x0, y0), (x1, y1)]`; exact at the
/// endpoints. Caller guarantees `x0 < x1` and `x0 <= x <= x1`.
fn lerp(x0: f64, y0: f64, x1: f64, y1: f64, x: f64) -> f64 {
    if x == x0 {
        return y0;
    }
    if x == x1 {
        return y1;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}
