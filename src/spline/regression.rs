//! Free-knot regression B-spline.
//!
//! For fixed knots the coefficients are the unique weighted (`1/σ²`) least-squares
//! solution against the spline's [`ObservationSet`]. They are never edited any other
//! way: moving knots or swapping data invalidates them until the next
//! [`RegressionSpline::solve_coefficients`].
//!
//! Outside the knot range the spline holds its boundary value.

use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::domain::KnotPlacement;
use crate::error::{FitError, FitResult};
use crate::fit::grid::linspace;
use crate::math::{
    BandedNormalEquations, MAX_DEGREE, SimplexOptions, basis_len, clamped_knots, nelder_mead, nonzero_basis,
    solve_least_squares,
};
use crate::spline::bok::{KnotBounds, KnotOptimizer, KnotPass};
use crate::spline::datapoints::ObservationSet;

/// Misfit norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Norm {
    /// Σ ((v - s(t)) / σ)²
    L2,
    /// Σ |v - s(t)| / σ
    L1,
}

/// How [`RegressionSpline::update_data`] treats the knot vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataUpdate {
    /// Keep interior knots; move the boundary knots to the new data range.
    AdjustExtremes,
    /// Keep every knot.
    Leave,
}

/// Regression spline with free interior knots.
#[derive(Debug, Clone)]
pub struct RegressionSpline {
    data: ObservationSet,
    degree: usize,
    start: f64,
    end: f64,
    interior: Vec<f64>,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    solved: bool,
    bounds: Vec<KnotBounds>,
    last_r2_nostab: Option<f64>,
}

impl RegressionSpline {
    /// Build an (unsolved) spline over the data range with the given knot placement.
    pub fn new(data: ObservationSet, degree: usize, placement: &KnotPlacement) -> FitResult<Self> {
        if degree == 0 || degree > MAX_DEGREE {
            return Err(FitError::InvalidInput(format!(
                "spline degree must be in 1..={MAX_DEGREE} (got {degree})"
            )));
        }
        let (start, end) = (data.first_time(), data.last_time());
        if !(end > start) {
            return Err(FitError::InvalidKnots("data span is empty".into()));
        }
        let mut spline = Self {
            data,
            degree,
            start,
            end,
            interior: Vec::new(),
            knots: Vec::new(),
            coefficients: Vec::new(),
            solved: false,
            bounds: Vec::new(),
            last_r2_nostab: None,
        };
        spline.place_knots(placement)?;
        Ok(spline)
    }

    /// Re-place interior knots (invalidates coefficients).
    pub fn place_knots(&mut self, placement: &KnotPlacement) -> FitResult<()> {
        let interior = match placement {
            KnotPlacement::Step(step) => uniform_by_step(self.start, self.end, *step)?,
            KnotPlacement::Count(n) => uniform_by_count(self.start, self.end, *n)?,
            KnotPlacement::Explicit(knots) => knots.clone(),
        };
        self.set_interior_knots(interior)
    }

    /// Replace the interior knots. They must be strictly increasing and strictly
    /// inside the boundary knots.
    pub fn set_interior_knots(&mut self, interior: Vec<f64>) -> FitResult<()> {
        validate_interior(self.start, self.end, &interior)?;
        self.interior = interior;
        self.rebuild_knots();
        Ok(())
    }

    fn rebuild_knots(&mut self) {
        self.knots = clamped_knots(self.start, self.end, &self.interior, self.degree);
        self.coefficients = vec![0.0; basis_len(self.knots.len(), self.degree)];
        self.solved = false;
    }

    /// Swap the data set.
    ///
    /// With [`DataUpdate::AdjustExtremes`] the boundary knots follow the new data
    /// range; interior knots that would fall outside it are an error.
    pub fn update_data(&mut self, data: ObservationSet, policy: DataUpdate) -> FitResult<()> {
        if policy == DataUpdate::AdjustExtremes {
            let (start, end) = (data.first_time(), data.last_time());
            validate_interior(start, end, &self.interior)?;
            self.start = start;
            self.end = end;
        }
        self.data = data;
        self.rebuild_knots();
        Ok(())
    }

    pub fn data(&self) -> &ObservationSet {
        &self.data
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// `(first knot, last knot)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.start, self.end)
    }

    pub fn interior_knots(&self) -> &[f64] {
        &self.interior
    }

    /// Full clamped knot vector.
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn is_solved(&self) -> bool {
        self.solved
    }

    /// Bounds used by the latest knot relocation pass.
    pub fn knot_bounds(&self) -> &[KnotBounds] {
        &self.bounds
    }

    pub(crate) fn set_knot_bounds(&mut self, bounds: Vec<KnotBounds>) {
        self.bounds = bounds;
    }

    /// Misfit of the real samples recorded by the latest full fit.
    pub fn last_r2_nostab(&self) -> Option<f64> {
        self.last_r2_nostab
    }

    /// Solve the weighted least-squares coefficients for the current knots.
    pub fn solve_coefficients(&mut self) -> FitResult<()> {
        self.coefficients = solve_weighted(&self.data, self.degree, &self.knots)?;
        self.solved = true;
        Ok(())
    }

    /// Restore coefficients saved from an earlier solve with the same knots.
    pub(crate) fn restore_coefficients(&mut self, coefficients: &[f64]) -> FitResult<()> {
        if coefficients.len() != self.coefficients.len() {
            return Err(FitError::MismatchedLength {
                what: "spline coefficients",
                expected: self.coefficients.len(),
                found: coefficients.len(),
            });
        }
        self.coefficients = coefficients.to_vec();
        self.solved = true;
        Ok(())
    }

    /// Spline value at `t` (boundary value outside the domain).
    ///
    /// Reflects the latest solve; a spline whose knots or data changed since
    /// evaluates to zero until solved again.
    pub fn evaluate(&self, t: f64) -> f64 {
        evaluate_with(self.degree, &self.knots, &self.coefficients, t.clamp(self.start, self.end))
    }

    pub fn evaluate_many(&self, ts: &[f64]) -> Vec<f64> {
        ts.iter().map(|&t| self.evaluate(t)).collect()
    }

    /// Weighted misfit against the spline's own data.
    pub fn misfit(&self, exclude_synthetic: bool, norm: Norm) -> FitResult<f64> {
        if !self.solved {
            return Err(FitError::UnsolvedSpline);
        }
        Ok(misfit_with(&self.data, self.degree, &self.knots, &self.coefficients, exclude_synthetic, norm))
    }

    /// Weighted residual sum of squares. Excluding synthetic samples records the
    /// value as [`Self::last_r2_nostab`].
    pub fn residual_sum_of_squares(&mut self, exclude_synthetic: bool) -> FitResult<f64> {
        let r2 = self.misfit(exclude_synthetic, Norm::L2)?;
        if exclude_synthetic {
            self.last_r2_nostab = Some(r2);
        }
        Ok(r2)
    }

    /// Σ |c_{i+1} - c_i| over the coefficients.
    pub fn total_variation_norm(&self) -> f64 {
        self.coefficients.windows(2).map(|w| (w[1] - w[0]).abs()).sum()
    }

    /// Trade fidelity for smoothness: minimize `RSS + lambda · TV(c)` over the
    /// coefficients with the knots fixed, starting from the least-squares solution.
    ///
    /// The result is kept only if it lowers the objective. Returns the objective.
    pub fn solve_regularized(&mut self, lambda: f64, max_evals: usize) -> FitResult<f64> {
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(FitError::InvalidInput(format!("lambda must be >= 0 (got {lambda})")));
        }
        self.solve_coefficients()?;
        let start = self.coefficients.clone();
        let (data, degree, knots) = (&self.data, self.degree, &self.knots);
        let objective = |c: &[f64]| {
            let tv: f64 = c.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            misfit_with(data, degree, knots, c, false, Norm::L2) + lambda * tv
        };
        let initial = objective(&start);
        let opts = SimplexOptions {
            xatol: 1e-6,
            fatol: 1e-6,
            max_evals: Some(max_evals),
        };
        let best = nelder_mead(&objective, &start, &opts);
        if best.value < initial {
            self.coefficients = best.x;
            trace!("regularized fit: {initial:.4} -> {:.4}", best.value);
            Ok(best.value)
        } else {
            Ok(initial)
        }
    }

    /// One knot relocation pass.
    pub fn relocate_knots(&mut self, optimizer: &mut KnotOptimizer) -> FitResult<KnotPass> {
        optimizer.run(self)
    }

    /// Re-solve with zero slope imposed at both ends.
    ///
    /// The first two and the last two coefficients are tied (`c0 = c1`,
    /// `c[n-2] = c[n-1]`) and refitted with every other coefficient held at its
    /// current least-squares value.
    pub fn solve_flat_boundary(&mut self) -> FitResult<()> {
        self.solve_coefficients()?;
        let n = self.coefficients.len();
        if n < 4 {
            return Err(FitError::InvalidKnots(format!(
                "flat boundaries need at least 4 coefficients (got {n})"
            )));
        }
        let k = self.degree;
        let mut vals = [0.0; MAX_DEGREE + 1];
        let mut rows: Vec<(f64, f64, f64)> = Vec::new();
        for ((&t, &v), &e) in self.data.times().iter().zip(self.data.values()).zip(self.data.errors()) {
            let first = nonzero_basis(t, k, &self.knots, &mut vals);
            let mut left = 0.0;
            let mut right = 0.0;
            let mut fixed = 0.0;
            for (a, &b) in vals[..=k].iter().enumerate() {
                let j = first + a;
                if j < 2 {
                    left += b;
                } else if j >= n - 2 {
                    right += b;
                } else {
                    fixed += b * self.coefficients[j];
                }
            }
            if left != 0.0 || right != 0.0 {
                rows.push((left / e, right / e, (v - fixed) / e));
            }
        }

        let x = DMatrix::from_fn(rows.len(), 2, |i, j| if j == 0 { rows[i].0 } else { rows[i].1 });
        let y = DVector::from_iterator(rows.len(), rows.iter().map(|r| r.2));
        let beta = solve_least_squares(&x, &y).ok_or(FitError::SingularSystem {
            coefficient: 0,
            start: self.start,
            end: self.end,
        })?;
        self.coefficients[0] = beta[0];
        self.coefficients[1] = beta[0];
        self.coefficients[n - 2] = beta[1];
        self.coefficients[n - 1] = beta[1];
        trace!("flat boundary refit: left={:.5} right={:.5}", beta[0], beta[1]);
        Ok(())
    }
}

/// Interior knots roughly every `step` days: `linspace(a, b, ⌊(b-a)/step⌋)` without
/// its end points.
pub fn uniform_by_step(start: f64, end: f64, step: f64) -> FitResult<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(FitError::InvalidKnots(format!("knot step must be > 0 (got {step})")));
    }
    let count = ((end - start) / step).floor() as usize;
    let grid = linspace(start, end, count);
    if grid.len() < 3 {
        return Err(FitError::InvalidKnots(format!(
            "knot step {step} leaves no interior knot in [{start}, {end}]"
        )));
    }
    Ok(grid[1..grid.len() - 1].to_vec())
}

/// `n` uniformly spaced interior knots.
pub fn uniform_by_count(start: f64, end: f64, n: usize) -> FitResult<Vec<f64>> {
    if n == 0 {
        return Err(FitError::InvalidKnots("at least one interior knot is required".into()));
    }
    let grid = linspace(start, end, n + 2);
    Ok(grid[1..=n].to_vec())
}

fn validate_interior(start: f64, end: f64, interior: &[f64]) -> FitResult<()> {
    if interior.is_empty() {
        return Err(FitError::InvalidKnots("at least one interior knot is required".into()));
    }
    if interior.iter().any(|t| !t.is_finite()) {
        return Err(FitError::InvalidKnots("non-finite knot".into()));
    }
    if interior.windows(2).any(|w| w[1] <= w[0]) {
        return Err(FitError::InvalidKnots("interior knots must be strictly increasing".into()));
    }
    if interior[0] <= start || interior[interior.len() - 1] >= end {
        return Err(FitError::InvalidKnots(format!(
            "interior knots must lie strictly inside [{start}, {end}]"
        )));
    }
    Ok(())
}

/// Weighted least-squares coefficients for `knots` against `data`.
pub(crate) fn solve_weighted(data: &ObservationSet, degree: usize, knots: &[f64]) -> FitResult<Vec<f64>> {
    let n_coef = basis_len(knots.len(), degree);
    let mut normal = BandedNormalEquations::new(n_coef, degree);
    let mut vals = [0.0; MAX_DEGREE + 1];
    for ((&t, &v), &e) in data.times().iter().zip(data.values()).zip(data.errors()) {
        let first = nonzero_basis(t, degree, knots, &mut vals);
        normal.accumulate(first, &vals[..=degree], v, 1.0 / (e * e));
    }
    match normal.solve() {
        Ok(beta) => Ok(beta.iter().copied().collect()),
        Err(pivot) => {
            let j = pivot.0;
            Err(FitError::SingularSystem {
                coefficient: j,
                start: knots[j],
                end: knots[(j + degree + 1).min(knots.len() - 1)],
            })
        }
    }
}

pub(crate) fn evaluate_with(degree: usize, knots: &[f64], coefficients: &[f64], t: f64) -> f64 {
    let mut vals = [0.0; MAX_DEGREE + 1];
    let first = nonzero_basis(t, degree, knots, &mut vals);
    vals[..=degree]
        .iter()
        .zip(&coefficients[first..=first + degree])
        .map(|(b, c)| b * c)
        .sum()
}

pub(crate) fn misfit_with(
    data: &ObservationSet,
    degree: usize,
    knots: &[f64],
    coefficients: &[f64],
    exclude_synthetic: bool,
    norm: Norm,
) -> f64 {
    let (start, end) = (knots[0], knots[knots.len() - 1]);
    let mut total = 0.0;
    for i in 0..data.len() {
        if exclude_synthetic && data.synthetic()[i] {
            continue;
        }
        let fitted = evaluate_with(degree, knots, coefficients, data.times()[i].clamp(start, end));
        let r = (data.values()[i] - fitted) / data.errors()[i];
        total += match norm {
            Norm::L2 => r * r,
            Norm::L1 => r.abs(),
        };
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(f: impl Fn(f64) -> f64, n: usize, span: f64) -> ObservationSet {
        let times: Vec<f64> = (0..n).map(|i| span * i as f64 / (n - 1) as f64).collect();
        let values = times.iter().map(|&t| f(t)).collect();
        ObservationSet::from_samples(times, values, vec![0.1; n], None).unwrap()
    }

    #[test]
    fn reproduces_a_cubic_exactly() {
        let cubic = |t: f64| 0.5 - 0.02 * t + 1e-3 * t * t - 1e-5 * t * t * t;
        let mut spline = RegressionSpline::new(samples(cubic, 60, 100.0), 3, &KnotPlacement::Count(4)).unwrap();
        spline.solve_coefficients().unwrap();
        for t in [0.0, 13.3, 50.0, 99.9, 100.0] {
            assert!((spline.evaluate(t) - cubic(t)).abs() < 1e-8, "t={t}");
        }
        assert!(spline.residual_sum_of_squares(true).unwrap() < 1e-12);
        assert!(spline.last_r2_nostab().is_some());
    }

    #[test]
    fn holds_boundary_values_outside_the_domain() {
        let mut spline =
            RegressionSpline::new(samples(|t| (t / 10.0).sin(), 80, 100.0), 3, &KnotPlacement::Step(10.0)).unwrap();
        spline.solve_coefficients().unwrap();
        assert_eq!(spline.evaluate(-50.0), spline.evaluate(0.0));
        assert_eq!(spline.evaluate(1e6), spline.evaluate(100.0));
    }

    #[test]
    fn solving_is_idempotent() {
        let mut spline =
            RegressionSpline::new(samples(|t| (t / 7.0).cos(), 90, 100.0), 3, &KnotPlacement::Step(8.0)).unwrap();
        spline.solve_coefficients().unwrap();
        let first = spline.coefficients().to_vec();
        spline.solve_coefficients().unwrap();
        assert_eq!(first, spline.coefficients());
    }

    #[test]
    fn empty_knot_interval_is_singular() {
        // Data only in [0, 10] and [90, 100]; knots every 5 days leave bases with no support.
        let times: Vec<f64> = (0..=10).map(f64::from).chain((90..=100).map(f64::from)).collect();
        let values = vec![1.0; times.len()];
        let set = ObservationSet::from_samples(times.clone(), values, vec![0.1; times.len()], None).unwrap();
        let mut spline = RegressionSpline::new(set, 3, &KnotPlacement::Step(5.0)).unwrap();
        let err = spline.solve_coefficients().unwrap_err();
        match err {
            FitError::SingularSystem { start, end, .. } => {
                assert!(start >= 10.0 && end <= 90.0, "interval [{start}, {end}]");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!spline.is_solved());
    }

    #[test]
    fn knot_changes_invalidate_coefficients() {
        let mut spline =
            RegressionSpline::new(samples(|t| t * 0.01, 40, 100.0), 3, &KnotPlacement::Count(3)).unwrap();
        spline.solve_coefficients().unwrap();
        assert!(spline.is_solved());
        spline.set_interior_knots(vec![20.0, 50.0, 70.0]).unwrap();
        assert!(!spline.is_solved());
        assert!(matches!(spline.misfit(false, Norm::L2), Err(FitError::UnsolvedSpline)));
    }

    #[test]
    fn invalid_knots_are_rejected() {
        let mut spline =
            RegressionSpline::new(samples(|t| t, 40, 100.0), 3, &KnotPlacement::Count(3)).unwrap();
        assert!(spline.set_interior_knots(vec![50.0, 40.0]).is_err());
        assert!(spline.set_interior_knots(vec![0.0, 40.0]).is_err());
        assert!(spline.set_interior_knots(Vec::new()).is_err());
        assert!(uniform_by_step(0.0, 10.0, 6.0).is_err());
        assert_eq!(uniform_by_step(0.0, 100.0, 20.0).unwrap(), vec![25.0, 50.0, 75.0]);
    }

    #[test]
    fn adjusting_extremes_keeps_interior_knots() {
        let mut spline =
            RegressionSpline::new(samples(|t| t, 40, 100.0), 3, &KnotPlacement::Count(3)).unwrap();
        let interior = spline.interior_knots().to_vec();
        let wider = ObservationSet::from_samples(vec![-10.0, 50.0, 120.0], vec![0.0; 3], vec![1.0; 3], None).unwrap();
        spline.update_data(wider, DataUpdate::AdjustExtremes).unwrap();
        assert_eq!(spline.interior_knots(), interior.as_slice());
        assert_eq!(spline.domain(), (-10.0, 120.0));

        let narrow = ObservationSet::from_samples(vec![30.0, 40.0], vec![0.0; 2], vec![1.0; 2], None).unwrap();
        assert!(spline.update_data(narrow, DataUpdate::AdjustExtremes).is_err());
    }

    #[test]
    fn total_variation_sums_coefficient_jumps() {
        let mut spline =
            RegressionSpline::new(samples(|_| 2.0, 40, 100.0), 3, &KnotPlacement::Count(3)).unwrap();
        spline.solve_coefficients().unwrap();
        assert!(spline.total_variation_norm() < 1e-9);
    }

    #[test]
    fn regularization_lowers_total_variation() {
        let wiggly = |t: f64| (t / 3.0).sin() * 0.3;
        let mut spline =
            RegressionSpline::new(samples(wiggly, 80, 100.0), 3, &KnotPlacement::Count(8)).unwrap();
        spline.solve_coefficients().unwrap();
        let tv_before = spline.total_variation_norm();
        spline.solve_regularized(50.0, 2000).unwrap();
        assert!(spline.total_variation_norm() <= tv_before);
    }

    #[test]
    fn flat_boundary_ties_end_coefficients() {
        let mut spline =
            RegressionSpline::new(samples(|t| 0.01 * t, 60, 100.0), 3, &KnotPlacement::Count(5)).unwrap();
        spline.solve_flat_boundary().unwrap();
        let c = spline.coefficients();
        let n = c.len();
        assert_eq!(c[0], c[1]);
        assert_eq!(c[n - 1], c[n - 2]);
        assert!(spline.misfit(false, Norm::L2).unwrap().is_finite());
    }
}
