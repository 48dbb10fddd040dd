//! Trial grids.
//!
//! Brute-force searches in this crate never materialize the full list of trial
//! tuples: [`TrialGrid`] enumerates the Cartesian product of per-axis candidate
//! values lazily, in lexicographic order, so a 4-curve hypercube of 41 shifts per
//! axis costs no memory up front. The search strategy consumes the iterator; it
//! does not care how the tuples were produced.

use crate::error::{FitError, FitResult};

/// `count` equally spaced points from `start` to `end` (both included).
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count as f64 - 1.0);
            let mut out: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
            // Land exactly on the end point.
            out[count - 1] = end;
            out
        }
    }
}

/// Symmetric brute-force offsets around `center`: `center + k·step` for
/// `k = -radius..=radius`.
pub fn centered_offsets(center: f64, step: f64, radius: usize) -> FitResult<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(FitError::InvalidInput(format!(
            "brute-force step must be finite and > 0 (got {step})"
        )));
    }
    let r = radius as f64;
    Ok(linspace(center - r * step, center + r * step, 2 * radius + 1))
}

/// Lazy Cartesian product over per-axis candidate values.
#[derive(Debug, Clone)]
pub struct TrialGrid {
    axes: Vec<Vec<f64>>,
    cursor: Vec<usize>,
    done: bool,
}

impl TrialGrid {
    /// Build a grid. An empty axis list yields nothing; so does any empty axis.
    pub fn new(axes: Vec<Vec<f64>>) -> Self {
        let done = axes.is_empty() || axes.iter().any(|a| a.is_empty());
        let cursor = vec![0; axes.len()];
        Self { axes, cursor, done }
    }

    /// Total number of tuples.
    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for TrialGrid {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self
            .cursor
            .iter()
            .zip(&self.axes)
            .map(|(&i, axis)| axis[i])
            .collect();

        // Odometer increment, last axis fastest.
        let mut axis = self.axes.len();
        loop {
            if axis == 0 {
                self.done = true;
                break;
            }
            axis -= 1;
            self.cursor[axis] += 1;
            if self.cursor[axis] < self.axes[axis].len() {
                break;
            }
            self.cursor[axis] = 0;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_includes_endpoints() {
        let v = linspace(-2.0, 2.0, 5);
        assert_eq!(v, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
    }

    #[test]
    fn centered_offsets_are_symmetric() {
        let v = centered_offsets(-20.0, 0.2, 10).unwrap();
        assert_eq!(v.len(), 21);
        assert!((v[0] + 22.0).abs() < 1e-12);
        assert!((v[10] + 20.0).abs() < 1e-12);
        assert!((v[20] + 18.0).abs() < 1e-12);
        assert!(centered_offsets(0.0, 0.0, 3).is_err());
    }

    #[test]
    fn grid_enumerates_the_product_lexicographically() {
        let grid = TrialGrid::new(vec![vec![0.0, 1.0], vec![10.0, 20.0, 30.0]]);
        assert_eq!(grid.len(), 6);
        let all: Vec<Vec<f64>> = grid.collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], vec![0.0, 10.0]);
        assert_eq!(all[1], vec![0.0, 20.0]);
        assert_eq!(all[3], vec![1.0, 10.0]);
        assert_eq!(all[5], vec![1.0, 30.0]);
    }

    #[test]
    fn empty_axis_yields_nothing() {
        assert_eq!(TrialGrid::new(vec![vec![1.0], vec![]]).count(), 0);
        assert_eq!(TrialGrid::new(Vec::new()).count(), 0);
    }
}
