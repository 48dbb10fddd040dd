//! Drift ("microlensing") models.
//!
//! Each curve may own one drift model: a slowly varying correction added to its
//! magnitudes on the curve's raw time axis. Two kinds exist behind one capability
//! trait ([`Drift`]):
//!
//! - [`PolynomialDrift`]: an independent polynomial per observing season
//! - [`SplineDrift`]: a small regression spline over the whole curve
//!
//! Drift models are fitted to `reference − value_without_drift`, i.e. they absorb
//! whatever separates a curve from the shared spline.

use serde::{Deserialize, Serialize};

use crate::domain::{BokConfig, KnotPlacement, Observation, StabError, StabilizationConfig};
use crate::error::{FitError, FitResult};
use crate::spline::RegressionSpline;

pub mod poly;
pub mod spline;

pub use poly::*;
pub use spline::*;

/// Capability interface shared by all drift models.
pub trait Drift {
    /// Drift at the curve's raw sample times (one value per sample).
    fn evaluate(&self, times: &[f64]) -> Vec<f64>;

    /// Refit the parameters to `target`.
    fn fit(&mut self, target: &DriftTarget, options: &DriftFitOptions) -> FitResult<()>;

    fn parameters(&self) -> Vec<f64>;

    /// Overwrite the parameters; the count must match [`Drift::parameter_count`].
    fn set_parameters(&mut self, params: &[f64]) -> FitResult<()>;

    fn parameter_count(&self) -> usize {
        self.parameters().len()
    }

    /// Zero the parameters (no drift).
    fn reset(&mut self) {
        let zeros = vec![0.0; self.parameter_count()];
        // Same length by construction.
        let _ = self.set_parameters(&zeros);
    }
}

/// A drift model of either kind.
#[derive(Debug, Clone)]
pub enum DriftModel {
    Polynomial(PolynomialDrift),
    Spline(SplineDrift),
}

impl DriftModel {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DriftModel::Polynomial(_) => "polynomial",
            DriftModel::Spline(_) => "spline",
        }
    }
}

impl Drift for DriftModel {
    fn evaluate(&self, times: &[f64]) -> Vec<f64> {
        match self {
            DriftModel::Polynomial(m) => m.evaluate(times),
            DriftModel::Spline(m) => m.evaluate(times),
        }
    }

    fn fit(&mut self, target: &DriftTarget, options: &DriftFitOptions) -> FitResult<()> {
        match self {
            DriftModel::Polynomial(m) => m.fit(target, options),
            DriftModel::Spline(m) => m.fit(target, options),
        }
    }

    fn parameters(&self) -> Vec<f64> {
        match self {
            DriftModel::Polynomial(m) => m.parameters(),
            DriftModel::Spline(m) => m.parameters(),
        }
    }

    fn set_parameters(&mut self, params: &[f64]) -> FitResult<()> {
        match self {
            DriftModel::Polynomial(m) => m.set_parameters(params),
            DriftModel::Spline(m) => m.set_parameters(params),
        }
    }
}

/// Options of one drift refit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriftFitOptions {
    /// Knot relocation passes (spline drifts only).
    pub bok_iterations: usize,
    /// Zero slope at both ends (spline drifts only).
    pub flat: bool,
}

/// What a drift model is fitted to: the included samples of one curve.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftTarget {
    /// Sample indices into the curve's arrays.
    pub indices: Vec<usize>,
    /// Raw times.
    pub times: Vec<f64>,
    /// `reference − value_without_drift`.
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

impl DriftTarget {
    /// Build from a curve and reference magnitudes at its shifted times (one per sample).
    pub fn new(obs: &Observation, reference: &[f64]) -> FitResult<Self> {
        if reference.len() != obs.len() {
            return Err(FitError::MismatchedLength {
                what: "reference values",
                expected: obs.len(),
                found: reference.len(),
            });
        }
        let base = obs.values_without_drift()?;
        let indices = obs.included_indices();
        Ok(Self {
            times: indices.iter().map(|&i| obs.times()[i]).collect(),
            values: indices.iter().map(|&i| reference[i] - base[i]).collect(),
            errors: indices.iter().map(|&i| obs.errors()[i]).collect(),
            indices,
        })
    }

    /// Target against a spline evaluated at the curve's shifted times.
    pub fn against(obs: &Observation, spline: &RegressionSpline) -> FitResult<Self> {
        Self::new(obs, &spline.evaluate_many(&obs.shifted_times()))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Declarative description of a drift model, for configs and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DriftSpec {
    /// `params` coefficients per season; seasons split at gaps wider than `season_gap`.
    Polynomial { params: usize, season_gap: f64 },
    /// Spline with a knot every `knot_step` days.
    Spline { knot_step: f64, bok_eps: f64 },
}

impl DriftSpec {
    /// Attachable model for `obs`, with zero parameters.
    pub fn build(&self, obs: &Observation) -> FitResult<DriftModel> {
        let model = match self {
            DriftSpec::Polynomial { params, season_gap } => {
                PolynomialDrift::for_observation(obs, *params, *season_gap).map(DriftModel::Polynomial)
            }
            DriftSpec::Spline { knot_step, bok_eps } => {
                let bok = BokConfig {
                    eps: *bok_eps,
                    tests: 10,
                    ..BokConfig::default()
                };
                let stab = StabilizationConfig::gaps_only(30.0, 3.0, StabError::MedianMultiple(1.0));
                SplineDrift::new(obs, &KnotPlacement::Step(*knot_step), &stab, bok).map(DriftModel::Spline)
            }
        };
        model.map_err(|e| e.in_observation(obs.label()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> Observation {
        let times: Vec<f64> = (0..40).map(|i| i as f64 * 5.0).collect();
        Observation::new("B", times, vec![18.0; 40], vec![0.02; 40]).unwrap()
    }

    #[test]
    fn target_subtracts_the_undrifted_curve() {
        let mut obs = curve();
        obs.set_mag_shift(0.5);
        obs.mask_points(&[0]).unwrap();
        let reference = vec![19.0; 40];
        let target = DriftTarget::new(&obs, &reference).unwrap();
        assert_eq!(target.len(), 39);
        assert_eq!(target.indices[0], 1);
        assert!(target.values.iter().all(|v| (v - 0.5).abs() < 1e-12));
        assert!(DriftTarget::new(&obs, &reference[..3]).is_err());
    }

    #[test]
    fn specs_build_zeroed_models() {
        let obs = curve();
        let poly = DriftSpec::Polynomial { params: 3, season_gap: 60.0 }.build(&obs).unwrap();
        assert_eq!(poly.kind_name(), "polynomial");
        assert_eq!(poly.parameter_count(), 3);
        assert!(poly.evaluate(obs.times()).iter().all(|v| *v == 0.0));

        let spl = DriftSpec::Spline { knot_step: 50.0, bok_eps: 5.0 }.build(&obs).unwrap();
        assert_eq!(spl.kind_name(), "spline");
        assert!(spl.evaluate(obs.times()).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn spec_errors_name_the_curve() {
        let obs = curve();
        let err = DriftSpec::Polynomial { params: 0, season_gap: 60.0 }.build(&obs).unwrap_err();
        assert!(err.to_string().contains("'B'"));
    }
}
