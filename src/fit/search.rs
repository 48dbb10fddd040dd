//! Time-shift search strategies.
//!
//! A strategy minimizes a score over a vector of shifts starting from the current
//! shifts. The score is a plain function: it is expected to work on its own copies
//! of curves and spline and to return `+∞` for infeasible trials.
//!
//! - [`GridSearch`]: every tuple of a symmetric grid around the start (evaluated in
//!   parallel; ties resolve to the earliest tuple)
//! - [`LocalDescent`]: Nelder–Mead from the start

use log::{trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::ShiftDescent;
use crate::error::{FitError, FitResult};
use crate::fit::grid::{TrialGrid, centered_offsets};
use crate::math::{SimplexOptions, nelder_mead};

/// Best point found by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub shifts: Vec<f64>,
    pub score: f64,
    pub evaluations: usize,
}

/// Objective over a shift vector.
pub type ShiftObjective<'a> = dyn Fn(&[f64]) -> f64 + Sync + 'a;

/// Common interface of grid and local searches.
pub trait ShiftSearch {
    fn minimize(&self, initial: &[f64], objective: &ShiftObjective<'_>) -> FitResult<SearchOutcome>;
}

/// Symmetric brute-force grid: `initial ± k·step`, `k ≤ radius`, on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSearch {
    pub step: f64,
    pub radius: usize,
}

impl ShiftSearch for GridSearch {
    fn minimize(&self, initial: &[f64], objective: &ShiftObjective<'_>) -> FitResult<SearchOutcome> {
        let axes = initial
            .iter()
            .map(|&c| centered_offsets(c, self.step, self.radius))
            .collect::<FitResult<Vec<_>>>()?;
        let grid = TrialGrid::new(axes);
        let evaluations = grid.len();
        trace!("grid search over {evaluations} tuples");

        let scored: Vec<(usize, Vec<f64>, f64)> = grid
            .enumerate()
            .par_bridge()
            .map(|(idx, shifts)| {
                let score = objective(&shifts);
                (idx, shifts, score)
            })
            .collect();
        let dropped = scored.iter().filter(|(_, _, score)| !score.is_finite()).count();
        if dropped > 0 && dropped < evaluations {
            warn!("{dropped} of {evaluations} time-shift trials were infeasible");
        }
        let best = scored
            .into_iter()
            .filter(|(_, _, score)| score.is_finite())
            .min_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)));

        match best {
            Some((_, shifts, score)) => Ok(SearchOutcome {
                shifts,
                score,
                evaluations,
            }),
            None => Err(FitError::InvalidInput("every time-shift trial was infeasible".into())),
        }
    }
}

/// Nelder–Mead descent from the current shifts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalDescent {
    pub options: SimplexOptions,
}

impl ShiftSearch for LocalDescent {
    fn minimize(&self, initial: &[f64], objective: &ShiftObjective<'_>) -> FitResult<SearchOutcome> {
        let res = nelder_mead(|x: &[f64]| objective(x), initial, &self.options);
        if !res.value.is_finite() {
            return Err(FitError::InvalidInput("every time-shift trial was infeasible".into()));
        }
        Ok(SearchOutcome {
            shifts: res.x,
            score: res.value,
            evaluations: res.evaluations,
        })
    }
}

/// Serializable choice of strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftMethod {
    Brute { step: f64, radius: usize },
    Descent(ShiftDescent),
}

impl ShiftMethod {
    pub fn searcher(&self) -> Box<dyn ShiftSearch> {
        match *self {
            ShiftMethod::Brute { step, radius } => Box::new(GridSearch { step, radius }),
            ShiftMethod::Descent(d) => Box::new(LocalDescent { options: d.into() }),
        }
    }
}
