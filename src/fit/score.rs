//! Scoring curves against a reference signal.
//!
//! Anything that can be evaluated at a time can serve as the reference: the shared
//! regression spline here, a Gaussian-process mean in an external estimator.

use crate::domain::Observation;
use crate::error::FitResult;
use crate::spline::{Norm, RegressionSpline};

/// A reference signal in effective (shifted) time.
pub trait Reference {
    fn value_at(&self, t: f64) -> f64;
}

impl Reference for RegressionSpline {
    fn value_at(&self, t: f64) -> f64 {
        self.evaluate(t)
    }
}

/// `effective − reference` for the included samples of one curve, in sample order.
pub fn residuals<R: Reference + ?Sized>(obs: &Observation, reference: &R) -> FitResult<Vec<f64>> {
    let eff = obs.effective_values()?;
    Ok(obs
        .included_indices()
        .into_iter()
        .map(|i| eff[i] - reference.value_at(obs.times()[i] + obs.time_shift()))
        .collect())
}

/// Weighted misfit of one curve.
pub fn curve_misfit<R: Reference + ?Sized>(obs: &Observation, reference: &R, norm: Norm) -> FitResult<f64> {
    let res = residuals(obs, reference)?;
    Ok(res
        .iter()
        .zip(obs.included_indices())
        .map(|(r, i)| {
            let z = r / obs.errors()[i];
            match norm {
                Norm::L2 => z * z,
                Norm::L1 => z.abs(),
            }
        })
        .sum())
}

/// Sum of weighted squared residuals of all curves against one reference.
pub fn discrepancy<R: Reference + ?Sized>(observations: &[Observation], reference: &R) -> FitResult<f64> {
    observations
        .iter()
        .map(|o| curve_misfit(o, reference, Norm::L2))
        .sum()
}

/// Residual variation of curves against a reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualVariation {
    /// Σ |r_{i+1} − r_i|, optionally divided by the combined error of the pair.
    pub total_variation: f64,
    /// Σ |r_i|, optionally divided by σ_i.
    pub distance: f64,
}

/// `value_without_drift − reference` for the included samples: what a drift
/// model would have to absorb.
fn residuals_without_drift<R: Reference + ?Sized>(obs: &Observation, reference: &R) -> FitResult<Vec<f64>> {
    let values = obs.values_without_drift()?;
    Ok(obs
        .included_indices()
        .into_iter()
        .map(|i| values[i] - reference.value_at(obs.times()[i] + obs.time_shift()))
        .collect())
}

/// Total variation of the residuals left before any drift correction. Curves
/// whose offset from the reference varies slowly score low; the attached drift
/// models are ignored.
pub fn residual_variation<R: Reference + ?Sized>(
    observations: &[Observation],
    reference: &R,
    weighted: bool,
) -> FitResult<ResidualVariation> {
    let mut total_variation = 0.0;
    let mut distance = 0.0;
    for obs in observations {
        let res = residuals_without_drift(obs, reference)?;
        let errs: Vec<f64> = obs.included_indices().iter().map(|&i| obs.errors()[i]).collect();
        for k in 1..res.len() {
            let jump = (res[k] - res[k - 1]).abs();
            total_variation += if weighted {
                jump / (errs[k] * errs[k] + errs[k - 1] * errs[k - 1]).sqrt()
            } else {
                jump
            };
        }
        for (r, e) in res.iter().zip(&errs) {
            distance += if weighted { r.abs() / e } else { r.abs() };
        }
    }
    Ok(ResidualVariation {
        total_variation,
        distance,
    })
}
