//! Bounded optimal knots (BOK): interior knot relocation.
//!
//! One pass visits every interior knot in order. Each knot may move inside bounds
//! derived from its neighbours:
//!
//! ```text
//! lower_i = min((t_{i-1} + t_i)/2 + eps/2, t_i)
//! upper_i = max((t_i + t_{i+1})/2 - eps/2, t_i)
//! ```
//!
//! optionally narrowed to `t_i ± window/2`. Bounds are computed once per pass from
//! the knots at the start of the pass, so two neighbours can never cross (for
//! `eps > 0`). Boundary knots never move.
//!
//! A candidate position replaces the current one only if it strictly lowers the
//! misfit (synthetic samples included). Candidates are scored on the side, without
//! touching the spline; a candidate whose system is singular scores `+∞`.

use log::{debug, trace, warn};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{BokConfig, KnotSearchMethod};
use crate::error::{FitError, FitResult};
use crate::fit::grid::linspace;
use crate::math::{basis_len, brent_bounded, clamped_knots};
use crate::spline::regression::{Norm, RegressionSpline, misfit_with, solve_weighted};

/// Bounds narrower than this (days) freeze the knot for the pass.
const DEGENERATE_WIDTH: f64 = 1e-9;

/// Absolute abscissa tolerance of the local descent.
const LOCAL_XTOL: f64 = 0.01;

/// Allowed range of one interior knot during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnotBounds {
    pub lower: f64,
    pub upper: f64,
}

impl KnotBounds {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Summary of one relocation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnotPass {
    /// Misfit (synthetic samples included) before the pass.
    pub before: f64,
    /// Misfit after the pass; never larger than `before`.
    pub after: f64,
    /// Knots that moved.
    pub moved: usize,
    /// Knots whose bounds were degenerate.
    pub frozen: usize,
}

/// Bounds for every interior knot of `[start, interior.., end]`.
pub fn knot_bounds(start: f64, end: f64, interior: &[f64], eps: f64, window: Option<f64>) -> Vec<KnotBounds> {
    (0..interior.len())
        .map(|i| {
            let t = interior[i];
            let prev = if i == 0 { start } else { interior[i - 1] };
            let next = if i + 1 == interior.len() { end } else { interior[i + 1] };
            let mut lower = (0.5 * (prev + t) + 0.5 * eps).min(t);
            let mut upper = (0.5 * (t + next) - 0.5 * eps).max(t);
            if let Some(w) = window {
                lower = lower.max(t - 0.5 * w);
                upper = upper.min(t + 0.5 * w);
            }
            KnotBounds { lower, upper }
        })
        .collect()
}

/// Relocates interior knots of a [`RegressionSpline`].
#[derive(Debug, Clone)]
pub struct KnotOptimizer {
    method: KnotSearchMethod,
    eps: f64,
    tests: usize,
    window: Option<f64>,
    rng: StdRng,
}

impl KnotOptimizer {
    pub fn new(config: &BokConfig) -> FitResult<Self> {
        if !(config.eps.is_finite() && config.eps > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "knot eps must be finite and > 0 (got {})",
                config.eps
            )));
        }
        if config.method != KnotSearchMethod::Local && config.tests == 0 {
            return Err(FitError::InvalidInput("knot search needs at least one trial position".into()));
        }
        Ok(Self {
            method: config.method,
            eps: config.eps,
            tests: config.tests,
            window: config.window,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Run one pass. The spline ends solved, with `last_r2_nostab` updated.
    pub fn run(&mut self, spline: &mut RegressionSpline) -> FitResult<KnotPass> {
        if !spline.is_solved() {
            spline.solve_coefficients()?;
        }
        let before = spline.misfit(false, Norm::L2)?;
        let (start, end) = spline.domain();
        let bounds = knot_bounds(start, end, spline.interior_knots(), self.eps, self.window);

        let mut interior = spline.interior_knots().to_vec();
        let mut current = before;
        let mut moved = 0;
        let mut frozen = 0;

        for (i, b) in bounds.iter().enumerate() {
            if b.width() < DEGENERATE_WIDTH {
                trace!("knot {i} at {:.3}: degenerate bounds, not moved", interior[i]);
                frozen += 1;
                continue;
            }
            let trial = |position: f64| score_position(spline, &interior, i, position);
            let best = match self.method {
                KnotSearchMethod::Scan => best_of(&linspace(b.lower, b.upper, self.tests), trial),
                KnotSearchMethod::Random => {
                    let positions: Vec<f64> = (0..self.tests).map(|_| self.rng.gen_range(b.lower..b.upper)).collect();
                    best_of(&positions, trial)
                }
                KnotSearchMethod::Local => {
                    let res = brent_bounded(trial, b.lower, b.upper, LOCAL_XTOL, 100);
                    Some((res.x, res.value))
                }
            };
            if let Some((position, score)) = best {
                if score < current && position != interior[i] {
                    trace!("knot {i}: {:.3} -> {position:.3} ({current:.4} -> {score:.4})", interior[i]);
                    interior[i] = position;
                    current = score;
                    moved += 1;
                }
            }
        }

        if frozen > 0 {
            warn!("{frozen} of {} knots have degenerate bounds (eps {})", bounds.len(), self.eps);
        }
        spline.set_interior_knots(interior)?;
        spline.solve_coefficients()?;
        spline.set_knot_bounds(bounds);
        let after = spline.misfit(false, Norm::L2)?;
        spline.residual_sum_of_squares(true)?;
        debug!("knot pass: misfit {before:.4} -> {after:.4}, {moved} moved, {frozen} frozen");

        Ok(KnotPass {
            before,
            after,
            moved,
            frozen,
        })
    }
}

/// Misfit of `spline` with interior knot `index` moved to `position`.
fn score_position(spline: &RegressionSpline, interior: &[f64], index: usize, position: f64) -> f64 {
    let mut trial = interior.to_vec();
    trial[index] = position;
    let (start, end) = spline.domain();
    if trial.windows(2).any(|w| w[1] <= w[0]) || trial[0] <= start || trial[trial.len() - 1] >= end {
        return f64::INFINITY;
    }
    let knots = clamped_knots(start, end, &trial, spline.degree());
    debug_assert_eq!(basis_len(knots.len(), spline.degree()), spline.coefficients().len());
    match solve_weighted(spline.data(), spline.degree(), &knots) {
        Ok(coefs) => misfit_with(spline.data(), spline.degree(), &knots, &coefs, false, Norm::L2),
        Err(_) => f64::INFINITY,
    }
}

/// Lowest score over `positions`; ties resolve to the lowest index.
fn best_of<F>(positions: &[f64], score: F) -> Option<(f64, f64)>
where
    F: Fn(f64) -> f64 + Sync,
{
    let scored: Vec<(usize, f64)> = positions
        .par_iter()
        .enumerate()
        .map(|(idx, &p)| (idx, score(p)))
        .collect();
    scored
        .into_iter()
        .filter(|(_, s)| s.is_finite())
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(idx, s)| (positions[idx], s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KnotPlacement;
    use crate::spline::datapoints::ObservationSet;

    fn bumpy_spline() -> RegressionSpline {
        // A sharp feature near t = 37 that uniform knots resolve poorly.
        let times: Vec<f64> = (0..200).map(|i| i as f64 * 0.5).collect();
        let values = times
            .iter()
            .map(|&t: &f64| 0.2 * (t / 15.0).sin() + (-(t - 37.0).powi(2) / 4.0).exp())
            .collect();
        let set = ObservationSet::from_samples(times, values, vec![0.05; 200], None).unwrap();
        let mut spline = RegressionSpline::new(set, 3, &KnotPlacement::Count(9)).unwrap();
        spline.solve_coefficients().unwrap();
        spline
    }

    fn config(method: KnotSearchMethod) -> BokConfig {
        BokConfig {
            iterations: 1,
            eps: 1.0,
            tests: 12,
            window: None,
            method,
            seed: 7,
        }
    }

    #[test]
    fn bounds_keep_neighbours_apart() {
        let b = knot_bounds(0.0, 100.0, &[20.0, 30.0, 80.0], 2.0, None);
        assert_eq!(b[0], KnotBounds { lower: 11.0, upper: 24.0 });
        assert_eq!(b[1], KnotBounds { lower: 26.0, upper: 54.0 });
        assert!(b[0].upper < b[1].lower);

        let w = knot_bounds(0.0, 100.0, &[20.0, 30.0, 80.0], 2.0, Some(4.0));
        assert_eq!(w[2], KnotBounds { lower: 78.0, upper: 82.0 });
    }

    #[test]
    fn bounds_collapse_when_eps_is_large() {
        let b = knot_bounds(0.0, 10.0, &[5.0], 20.0, None);
        assert_eq!(b[0].width(), 0.0);
    }

    #[test]
    fn every_method_never_increases_the_misfit() {
        for method in [KnotSearchMethod::Scan, KnotSearchMethod::Random, KnotSearchMethod::Local] {
            let mut spline = bumpy_spline();
            let mut optimizer = KnotOptimizer::new(&config(method)).unwrap();
            let mut last = spline.misfit(false, Norm::L2).unwrap();
            for _ in 0..3 {
                let pass = spline.relocate_knots(&mut optimizer).unwrap();
                assert!(pass.after <= pass.before + 1e-9, "{method:?}: {} > {}", pass.after, pass.before);
                assert!((pass.before - last).abs() < 1e-9 * last.max(1.0));
                last = pass.after;
                assert!(spline.interior_knots().windows(2).all(|w| w[1] > w[0]));
            }
            assert!(spline.is_solved());
            assert!(spline.last_r2_nostab().is_some());
        }
    }

    #[test]
    fn scan_improves_a_poorly_placed_spline() {
        let mut spline = bumpy_spline();
        let mut optimizer = KnotOptimizer::new(&config(KnotSearchMethod::Scan)).unwrap();
        let pass = spline.relocate_knots(&mut optimizer).unwrap();
        assert!(pass.moved > 0);
        assert!(pass.after < pass.before);
    }

    #[test]
    fn random_trials_are_reproducible() {
        let run = || {
            let mut spline = bumpy_spline();
            let mut optimizer = KnotOptimizer::new(&config(KnotSearchMethod::Random)).unwrap();
            spline.relocate_knots(&mut optimizer).unwrap();
            spline.interior_knots().to_vec()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn rejects_non_positive_eps() {
        let mut cfg = config(KnotSearchMethod::Scan);
        cfg.eps = 0.0;
        assert!(KnotOptimizer::new(&cfg).is_err());
    }
}
