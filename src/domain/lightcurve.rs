//! Light curves ("observations") and their adjustable offsets.
//!
//! An [`Observation`] keeps its raw samples untouched. Everything the optimizer
//! changes lives in separate fields:
//!
//! - `time_shift` (days), added to every raw time
//! - `flux_shift`, added to every flux before converting back to magnitudes
//! - `mag_shift`, added to every magnitude
//! - an optional drift model, evaluated on the raw time axis and added last
//!
//! So the effective value of sample `i` is
//!
//! ```text
//! m_eff = -2.5 log10(10^(-0.4 m_i) + flux_shift) + mag_shift + drift(t_i)
//! ```
//!
//! Drift models are anchored to raw times so they travel with the curve when its
//! time shift changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::season::{Season, split_seasons};
use crate::error::{FitError, FitResult};
use crate::math::{mean, median};
use crate::models::{Drift, DriftModel};

/// One light curve of one lensed image.
#[derive(Debug, Clone)]
pub struct Observation {
    label: String,
    telescope: String,
    times: Vec<f64>,
    values: Vec<f64>,
    errors: Vec<f64>,
    mask: Vec<bool>,
    time_shift: f64,
    mag_shift: f64,
    flux_shift: f64,
    drift: Option<DriftModel>,
    properties: BTreeMap<usize, BTreeMap<String, String>>,
}

/// Sampling summary of one curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingStats {
    pub samples: usize,
    pub seasons: usize,
    pub median_step: f64,
    pub mean_step: f64,
    pub min_step: f64,
    pub max_step: f64,
}

impl Observation {
    /// Validate and build a curve. Times must be strictly increasing; errors
    /// finite and positive. All samples start included.
    pub fn new(label: impl Into<String>, times: Vec<f64>, values: Vec<f64>, errors: Vec<f64>) -> FitResult<Self> {
        let label = label.into();
        let n = times.len();
        if values.len() != n {
            return Err(FitError::MismatchedLength {
                what: "values",
                expected: n,
                found: values.len(),
            }
            .in_observation(&label));
        }
        if errors.len() != n {
            return Err(FitError::MismatchedLength {
                what: "errors",
                expected: n,
                found: errors.len(),
            }
            .in_observation(&label));
        }
        if times.iter().chain(&values).any(|v| !v.is_finite()) {
            return Err(FitError::InvalidInput("non-finite time or value".into()).in_observation(&label));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FitError::InvalidInput("times must be strictly increasing".into()).in_observation(&label));
        }
        if errors.iter().any(|e| !(e.is_finite() && *e > 0.0)) {
            return Err(FitError::InvalidInput("errors must be finite and > 0".into()).in_observation(&label));
        }

        Ok(Self {
            label,
            telescope: String::new(),
            mask: vec![true; n],
            times,
            values,
            errors,
            time_shift: 0.0,
            mag_shift: 0.0,
            flux_shift: 0.0,
            drift: None,
            properties: BTreeMap::new(),
        })
    }

    pub fn with_telescope(mut self, telescope: impl Into<String>) -> Self {
        self.telescope = telescope.into();
        self
    }

    /// Replace the inclusion mask (`true` = sample used in fits).
    pub fn with_mask(mut self, mask: Vec<bool>) -> FitResult<Self> {
        if mask.len() != self.len() {
            return Err(FitError::MismatchedLength {
                what: "mask",
                expected: self.len(),
                found: mask.len(),
            }
            .in_observation(&self.label));
        }
        self.mask = mask;
        Ok(self)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn telescope(&self) -> &str {
        &self.telescope
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Raw (unshifted) sample times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Raw magnitudes.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn time_shift(&self) -> f64 {
        self.time_shift
    }

    pub fn set_time_shift(&mut self, shift: f64) {
        self.time_shift = shift;
    }

    pub fn mag_shift(&self) -> f64 {
        self.mag_shift
    }

    pub fn set_mag_shift(&mut self, shift: f64) {
        self.mag_shift = shift;
    }

    pub fn flux_shift(&self) -> f64 {
        self.flux_shift
    }

    /// Smallest flux shift that keeps every flux non-negative.
    pub fn min_flux_shift(&self) -> f64 {
        let min_flux = self
            .values
            .iter()
            .map(|m| 10f64.powf(-0.4 * m))
            .fold(f64::INFINITY, f64::min);
        -min_flux
    }

    /// Set the flux shift. With `conserve_mean`, `mag_shift` absorbs the change of
    /// the mean magnitude so the curve stays at the same level.
    pub fn set_flux_shift(&mut self, flux_shift: f64, conserve_mean: bool) -> FitResult<()> {
        let before = if conserve_mean {
            mean(&self.flux_corrected_values()?)
        } else {
            None
        };
        let previous = self.flux_shift;
        self.flux_shift = flux_shift;
        let after = match self.flux_corrected_values() {
            Ok(v) => v,
            Err(e) => {
                self.flux_shift = previous;
                return Err(e);
            }
        };
        if let (Some(before), Some(after)) = (before, mean(&after)) {
            self.mag_shift += before - after;
        }
        Ok(())
    }

    /// Zero all offsets. The drift model (if any) is kept.
    pub fn reset_shifts(&mut self) {
        self.time_shift = 0.0;
        self.mag_shift = 0.0;
        self.flux_shift = 0.0;
    }

    pub fn drift(&self) -> Option<&DriftModel> {
        self.drift.as_ref()
    }

    pub fn drift_mut(&mut self) -> Option<&mut DriftModel> {
        self.drift.as_mut()
    }

    pub fn has_drift(&self) -> bool {
        self.drift.is_some()
    }

    pub fn set_drift(&mut self, drift: DriftModel) {
        self.drift = Some(drift);
    }

    /// Remove and return the drift model.
    pub fn take_drift(&mut self) -> Option<DriftModel> {
        self.drift.take()
    }

    /// Zero the drift model's parameters (keeps the model attached).
    pub fn reset_drift(&mut self) {
        if let Some(drift) = self.drift.as_mut() {
            drift.reset();
        }
    }

    /// `times + time_shift` for every sample.
    pub fn shifted_times(&self) -> Vec<f64> {
        self.times.iter().map(|t| t + self.time_shift).collect()
    }

    /// Raw magnitudes after the flux shift.
    pub fn flux_corrected_values(&self) -> FitResult<Vec<f64>> {
        if self.flux_shift == 0.0 {
            return Ok(self.values.clone());
        }
        self.values
            .iter()
            .map(|m| {
                let flux = 10f64.powf(-0.4 * m) + self.flux_shift;
                if flux > 0.0 {
                    Ok(-2.5 * flux.log10())
                } else {
                    Err(FitError::NegativeFlux {
                        flux_shift: self.flux_shift,
                    }
                    .in_observation(&self.label))
                }
            })
            .collect()
    }

    /// Flux-corrected magnitudes plus `mag_shift`, without the drift.
    pub fn values_without_drift(&self) -> FitResult<Vec<f64>> {
        let mut v = self.flux_corrected_values()?;
        for m in &mut v {
            *m += self.mag_shift;
        }
        Ok(v)
    }

    /// Drift contribution per sample (zeros without a drift model).
    pub fn drift_values(&self) -> Vec<f64> {
        match &self.drift {
            Some(d) => d.evaluate(&self.times),
            None => vec![0.0; self.len()],
        }
    }

    /// Fully corrected magnitudes.
    pub fn effective_values(&self) -> FitResult<Vec<f64>> {
        let mut v = self.values_without_drift()?;
        for (m, d) in v.iter_mut().zip(self.drift_values()) {
            *m += d;
        }
        Ok(v)
    }

    /// Indices of samples currently included in fits.
    pub fn included_indices(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect()
    }

    pub fn included_count(&self) -> usize {
        self.mask.iter().filter(|&&keep| keep).count()
    }

    /// Exclude the given samples. Arrays keep their length.
    pub fn mask_points(&mut self, indices: &[usize]) -> FitResult<()> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(FitError::InvalidInput(format!("sample index {bad} out of range")).in_observation(&self.label));
        }
        for &i in indices {
            self.mask[i] = false;
        }
        Ok(())
    }

    pub fn unmask_all(&mut self) {
        self.mask.iter_mut().for_each(|m| *m = true);
    }

    /// Seasons of the raw time axis.
    pub fn seasons(&self, gap: f64) -> Vec<Season> {
        split_seasons(&self.times, gap)
    }

    /// Attach a free-form property to a sample (importer metadata).
    pub fn set_property(&mut self, idx: usize, key: impl Into<String>, value: impl Into<String>) -> FitResult<()> {
        if idx >= self.len() {
            return Err(FitError::InvalidInput(format!("sample index {idx} out of range")).in_observation(&self.label));
        }
        self.properties.entry(idx).or_default().insert(key.into(), value.into());
        Ok(())
    }

    pub fn property(&self, idx: usize, key: &str) -> Option<&str> {
        self.properties.get(&idx).and_then(|p| p.get(key)).map(String::as_str)
    }

    /// Sampling summary. Steps are taken over all samples, seasons by `season_gap`.
    pub fn sampling_stats(&self, season_gap: f64) -> SamplingStats {
        let steps: Vec<f64> = self.times.windows(2).map(|w| w[1] - w[0]).collect();
        SamplingStats {
            samples: self.len(),
            seasons: self.seasons(season_gap).len(),
            median_step: median(&steps).unwrap_or(0.0),
            mean_step: mean(&steps).unwrap_or(0.0),
            min_step: steps.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max_step: steps.iter().copied().reduce(f64::max).unwrap_or(0.0),
        }
    }
}

/// Time shifts of all curves, in order.
pub fn time_shifts(observations: &[Observation]) -> Vec<f64> {
    observations.iter().map(Observation::time_shift).collect()
}

/// Set time shifts. With `include_first == false`, `shifts` has one entry per curve
/// after the first and the first curve keeps its shift.
pub fn set_time_shifts(observations: &mut [Observation], shifts: &[f64], include_first: bool) -> FitResult<()> {
    let skip = usize::from(!include_first);
    let expected = observations.len().saturating_sub(skip);
    if shifts.len() != expected {
        return Err(FitError::MismatchedLength {
            what: "time shifts",
            expected,
            found: shifts.len(),
        });
    }
    for (obs, &shift) in observations.iter_mut().skip(skip).zip(shifts) {
        obs.set_time_shift(shift);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> Observation {
        Observation::new("A", vec![0.0, 1.0, 2.0, 50.0], vec![18.0, 18.5, 19.0, 18.2], vec![0.01; 4]).unwrap()
    }

    #[test]
    fn rejects_mismatched_and_unsorted_input() {
        let err = Observation::new("B", vec![0.0, 1.0], vec![1.0], vec![0.1, 0.1]).unwrap_err();
        assert!(matches!(err.root(), FitError::MismatchedLength { what: "values", .. }));
        assert!(err.to_string().starts_with("curve 'B'"));

        let err = Observation::new("C", vec![1.0, 1.0], vec![1.0, 1.0], vec![0.1, 0.1]).unwrap_err();
        assert!(matches!(err.root(), FitError::InvalidInput(_)));

        let err = Observation::new("D", vec![1.0, 2.0], vec![1.0, 1.0], vec![0.1, 0.0]).unwrap_err();
        assert!(matches!(err.root(), FitError::InvalidInput(_)));
    }

    #[test]
    fn offsets_are_applied_in_order() {
        let mut obs = curve();
        obs.set_time_shift(-5.0);
        obs.set_mag_shift(0.3);
        assert_eq!(obs.shifted_times(), vec![-5.0, -4.0, -3.0, 45.0]);
        let eff = obs.effective_values().unwrap();
        assert!((eff[0] - 18.3).abs() < 1e-12);
        // Raw samples untouched.
        assert_eq!(obs.values()[0], 18.0);
    }

    #[test]
    fn resets_clear_offsets_and_drift_parameters_separately() {
        use crate::models::{Drift, DriftModel, PolynomialDrift};

        let mut obs = curve();
        let mut drift = PolynomialDrift::for_observation(&obs, 1, 10.0).unwrap();
        drift.set_parameters(&[0.1, -0.2]).unwrap();
        obs.set_drift(DriftModel::Polynomial(drift));
        obs.set_time_shift(3.0);
        obs.set_mag_shift(0.4);
        assert_eq!(obs.drift_values(), vec![0.1, 0.1, 0.1, -0.2]);

        obs.reset_shifts();
        assert_eq!((obs.time_shift(), obs.mag_shift(), obs.flux_shift()), (0.0, 0.0, 0.0));
        assert_eq!(obs.drift_values(), vec![0.1, 0.1, 0.1, -0.2]);

        obs.reset_drift();
        assert!(obs.has_drift());
        assert_eq!(obs.drift_values(), vec![0.0; 4]);
        assert_eq!(obs.effective_values().unwrap(), obs.values());
    }

    #[test]
    fn flux_shift_below_minimum_is_rejected() {
        let mut obs = curve();
        let min = obs.min_flux_shift();
        assert!(min < 0.0);
        let err = obs.set_flux_shift(min * 1.5, false).unwrap_err();
        assert!(matches!(err.root(), FitError::NegativeFlux { .. }));
        assert_eq!(obs.flux_shift(), 0.0);
    }

    #[test]
    fn conserving_flux_shift_keeps_the_mean_magnitude() {
        let mut obs = curve();
        let before = mean(&obs.effective_values().unwrap()).unwrap();
        let fs = 0.3 * obs.min_flux_shift();
        obs.set_flux_shift(fs, true).unwrap();
        let after = mean(&obs.effective_values().unwrap()).unwrap();
        assert!((before - after).abs() < 1e-10);
        assert!(obs.mag_shift() != 0.0);
    }

    #[test]
    fn masking_keeps_array_lengths() {
        let mut obs = curve();
        obs.mask_points(&[1, 3]).unwrap();
        assert_eq!(obs.len(), 4);
        assert_eq!(obs.included_indices(), vec![0, 2]);
        assert!(obs.mask_points(&[9]).is_err());
        obs.unmask_all();
        assert_eq!(obs.included_count(), 4);
    }

    #[test]
    fn properties_live_in_a_side_table() {
        let mut obs = curve().with_telescope("Euler");
        obs.set_property(2, "fwhm", "1.3").unwrap();
        assert_eq!(obs.property(2, "fwhm"), Some("1.3"));
        assert_eq!(obs.property(1, "fwhm"), None);
        assert_eq!(obs.telescope(), "Euler");
    }

    #[test]
    fn shifts_can_skip_the_reference_curve() {
        let mut curves = vec![curve(), curve(), curve()];
        set_time_shifts(&mut curves, &[4.0, 9.0], false).unwrap();
        assert_eq!(time_shifts(&curves), vec![0.0, 4.0, 9.0]);
        assert!(set_time_shifts(&mut curves, &[1.0], true).is_err());
    }

    #[test]
    fn sampling_stats_counts_seasons() {
        let stats = curve().sampling_stats(10.0);
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.seasons, 2);
        assert_eq!(stats.min_step, 1.0);
        assert_eq!(stats.max_step, 48.0);
    }
}
