//! Reporting utilities: residual summaries, delay comparisons, formatted output.

use serde::Serialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::fit::{Delay, residuals};
use crate::math::mean;
use crate::spline::RegressionSpline;

pub mod format;

pub use format::*;

/// Residual summary of one curve against the shared spline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveResiduals {
    pub label: String,
    pub samples: usize,
    pub mean: f64,
    pub rms: f64,
    /// Σ (r/σ)² / n.
    pub reduced_chi2: f64,
}

/// Estimated delay next to the true one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayComparison {
    pub name: String,
    pub estimated: f64,
    pub truth: Option<f64>,
}

impl DelayComparison {
    pub fn error(&self) -> Option<f64> {
        self.truth.map(|t| self.estimated - t)
    }
}

/// Residual statistics of every curve.
pub fn compute_residuals(observations: &[Observation], spline: &RegressionSpline) -> Result<Vec<CurveResiduals>, AppError> {
    let mut out = Vec::with_capacity(observations.len());
    for obs in observations {
        let res = residuals(obs, spline)?;
        let n = res.len();
        let Some(m) = mean(&res) else {
            return Err(AppError::new(4, format!("Curve '{}' has no included samples.", obs.label())));
        };
        let chi2: f64 = res
            .iter()
            .zip(obs.included_indices())
            .map(|(r, i)| (r / obs.errors()[i]).powi(2))
            .sum();
        let rms = (res.iter().map(|r| r * r).sum::<f64>() / n as f64).sqrt();
        if !(rms.is_finite() && chi2.is_finite()) {
            return Err(AppError::new(4, "Non-finite residuals against the fitted spline."));
        }
        out.push(CurveResiduals {
            label: obs.label().to_string(),
            samples: n,
            mean: m,
            rms,
            reduced_chi2: chi2 / n as f64,
        });
    }
    Ok(out)
}

/// Pair estimated delays with the true ones (matched by pair name, either order).
pub fn compare_delays(estimated: &[Delay], truth: &[Delay]) -> Vec<DelayComparison> {
    estimated
        .iter()
        .map(|d| {
            let truth = truth.iter().find_map(|t| {
                if t.from == d.from && t.to == d.to {
                    Some(t.days)
                } else if t.from == d.to && t.to == d.from {
                    Some(-t.days)
                } else {
                    None
                }
            });
            DelayComparison {
                name: d.name(),
                estimated: d.days,
                truth,
            }
        })
        .collect()
}
