//! Spline drift: a small regression spline on the curve's raw time axis.
//!
//! Only gap stabilization is used (no flat extensions), and knot relocation
//! follows the same rules as for the shared spline.

use crate::domain::{BokConfig, KnotPlacement, Observation, StabilizationConfig};
use crate::error::FitResult;
use crate::models::{Drift, DriftFitOptions, DriftTarget};
use crate::spline::{DataUpdate, KnotOptimizer, ObservationSet, RegressionSpline};

#[derive(Debug, Clone)]
pub struct SplineDrift {
    spline: RegressionSpline,
    bok: BokConfig,
}

impl SplineDrift {
    /// Zero drift over the included samples of `obs`.
    pub fn new(
        obs: &Observation,
        knots: &KnotPlacement,
        stabilization: &StabilizationConfig,
        bok: BokConfig,
    ) -> FitResult<Self> {
        let included = obs.included_indices();
        let times = included.iter().map(|&i| obs.times()[i]).collect();
        let errors = included.iter().map(|&i| obs.errors()[i]).collect();
        let data = ObservationSet::from_samples(times, vec![0.0; included.len()], errors, Some(stabilization))?;
        let mut spline = RegressionSpline::new(data, 3, knots)?;
        spline.solve_coefficients()?;
        // Validate the relocation settings up front.
        KnotOptimizer::new(&bok)?;
        Ok(Self { spline, bok })
    }

    pub fn spline(&self) -> &RegressionSpline {
        &self.spline
    }
}

impl Drift for SplineDrift {
    fn evaluate(&self, times: &[f64]) -> Vec<f64> {
        self.spline.evaluate_many(times)
    }

    fn fit(&mut self, target: &DriftTarget, options: &DriftFitOptions) -> FitResult<()> {
        let stabilization = self.spline.data().stabilization().cloned();
        let data = ObservationSet::from_samples(
            target.times.clone(),
            target.values.clone(),
            target.errors.clone(),
            stabilization.as_ref(),
        )?;
        let mut spline = self.spline.clone();
        spline.update_data(data, DataUpdate::AdjustExtremes)?;
        if options.bok_iterations > 0 {
            let mut optimizer = KnotOptimizer::new(&self.bok)?;
            for _ in 0..options.bok_iterations {
                spline.relocate_knots(&mut optimizer)?;
            }
        } else {
            spline.solve_coefficients()?;
        }
        if options.flat {
            spline.solve_flat_boundary()?;
        }
        self.spline = spline;
        Ok(())
    }

    fn parameters(&self) -> Vec<f64> {
        self.spline.coefficients().to_vec()
    }

    fn set_parameters(&mut self, params: &[f64]) -> FitResult<()> {
        self.spline.restore_coefficients(params)
    }
}
