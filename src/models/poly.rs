//! Per-season polynomial drift.
//!
//! Season `s` gets `n_params` coefficients of a polynomial in `t - c_s`, where `c_s`
//! is the season's mean raw time (fixed at creation). Seasons are fitted
//! independently; nothing ties the end of one season to the start of the next.

use nalgebra::{DMatrix, DVector};

use crate::domain::{Observation, Season, split_seasons};
use crate::error::{FitError, FitResult};
use crate::math::{mean, solve_least_squares};
use crate::models::{Drift, DriftFitOptions, DriftTarget};

#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialDrift {
    seasons: Vec<Season>,
    centers: Vec<f64>,
    spans: Vec<(f64, f64)>,
    n_params: usize,
    coefficients: Vec<Vec<f64>>,
}

impl PolynomialDrift {
    /// Zero drift over the seasons of `times` (raw, sorted).
    pub fn new(times: &[f64], n_params: usize, season_gap: f64) -> FitResult<Self> {
        if n_params == 0 {
            return Err(FitError::InvalidInput("polynomial drift needs at least one parameter".into()));
        }
        if times.is_empty() {
            return Err(FitError::InvalidInput("polynomial drift needs samples".into()));
        }
        let seasons = split_seasons(times, season_gap);
        let centers = seasons
            .iter()
            .map(|s| mean(&times[s.range()]).unwrap_or(0.0))
            .collect();
        let spans = seasons.iter().map(|s| s.span(times)).collect();
        Ok(Self {
            coefficients: vec![vec![0.0; n_params]; seasons.len()],
            seasons,
            centers,
            spans,
            n_params,
        })
    }

    pub fn for_observation(obs: &Observation, n_params: usize, season_gap: f64) -> FitResult<Self> {
        Self::new(obs.times(), n_params, season_gap)
    }

    pub fn seasons(&self) -> &[Season] {
        &self.seasons
    }

    /// Coefficients of season `s`, constant term first.
    pub fn season_coefficients(&self, s: usize) -> &[f64] {
        &self.coefficients[s]
    }

    pub fn params_per_season(&self) -> usize {
        self.n_params
    }

    /// Season whose span holds `t`; times in a gap go to the closer season.
    pub fn season_at(&self, t: f64) -> usize {
        let distance = |&(start, end): &(f64, f64)| {
            if t < start {
                start - t
            } else if t > end {
                t - end
            } else {
                0.0
            }
        };
        self.spans
            .iter()
            .enumerate()
            .min_by(|a, b| distance(a.1).total_cmp(&distance(b.1)))
            .map_or(0, |(s, _)| s)
    }

    fn fit_season(&self, s: usize, times: &[f64], values: &[f64], errors: &[f64]) -> FitResult<Vec<f64>> {
        if times.len() < self.n_params {
            return Err(FitError::UnderdeterminedFit {
                season: s,
                samples: times.len(),
                parameters: self.n_params,
            });
        }
        let c = self.centers[s];
        let x = DMatrix::from_fn(times.len(), self.n_params, |i, p| (times[i] - c).powi(p as i32) / errors[i]);
        let y = DVector::from_iterator(times.len(), values.iter().zip(errors).map(|(v, e)| v / e));
        let (start, end) = self.spans[s];
        solve_least_squares(&x, &y)
            .map(|beta| beta.iter().copied().collect())
            .ok_or(FitError::SingularSystem {
                coefficient: 0,
                start,
                end,
            })
    }
}

impl Drift for PolynomialDrift {
    fn evaluate(&self, times: &[f64]) -> Vec<f64> {
        times
            .iter()
            .map(|&t| {
                let s = self.season_at(t);
                let x = t - self.centers[s];
                self.coefficients[s].iter().rev().fold(0.0, |acc, &a| acc * x + a)
            })
            .collect()
    }

    fn fit(&mut self, target: &DriftTarget, _options: &DriftFitOptions) -> FitResult<()> {
        let mut fitted = Vec::with_capacity(self.seasons.len());
        for (s, season) in self.seasons.iter().enumerate() {
            let members: Vec<usize> = (0..target.len())
                .filter(|&k| season.contains(target.indices[k]))
                .collect();
            let times: Vec<f64> = members.iter().map(|&k| target.times[k]).collect();
            let values: Vec<f64> = members.iter().map(|&k| target.values[k]).collect();
            let errors: Vec<f64> = members.iter().map(|&k| target.errors[k]).collect();
            fitted.push(self.fit_season(s, &times, &values, &errors)?);
        }
        self.coefficients = fitted;
        Ok(())
    }

    fn parameters(&self) -> Vec<f64> {
        self.coefficients.iter().flatten().copied().collect()
    }

    fn set_parameters(&mut self, params: &[f64]) -> FitResult<()> {
        let expected = self.seasons.len() * self.n_params;
        if params.len() != expected {
            return Err(FitError::MismatchedLength {
                what: "drift parameters",
                expected,
                found: params.len(),
            });
        }
        self.coefficients = params.chunks(self.n_params).map(<[f64]>::to_vec).collect();
        Ok(())
    }
}
