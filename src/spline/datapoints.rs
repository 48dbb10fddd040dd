//! Merged, sorted sample sets for spline fitting.
//!
//! An [`ObservationSet`] is the concatenation of the effective (shifted, offset and
//! drift-corrected) samples of several curves, sorted by time. It is rebuilt
//! whenever the curves change; it is never edited in place.
//!
//! Optionally it carries synthetic *stabilization* samples:
//!
//! - flat extensions of `extent` days before the first and after the last sample,
//! - linearly interpolated fillers inside every gap wider than `gap` days,
//!
//! spaced by `step` days and given a large error, so free knots cannot make the
//! spline swing wildly where there is no data.

use crate::domain::{Observation, StabError, StabilizationConfig};
use crate::error::{FitError, FitResult};
use crate::fit::grid::linspace;
use crate::math::median;

/// Default separation (days) given to samples that share a time.
pub const DEFAULT_DELTA_T: f64 = 1e-6;

/// Sorted samples with synthetic-sample flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    times: Vec<f64>,
    values: Vec<f64>,
    errors: Vec<f64>,
    synthetic: Vec<bool>,
    stabilization: Option<StabilizationConfig>,
    delta_t: f64,
}

impl ObservationSet {
    /// Build a set from loose samples. Samples are sorted and coincident times
    /// separated by `DEFAULT_DELTA_T`.
    pub fn from_samples(
        times: Vec<f64>,
        values: Vec<f64>,
        errors: Vec<f64>,
        stabilization: Option<&StabilizationConfig>,
    ) -> FitResult<Self> {
        let n = times.len();
        if values.len() != n {
            return Err(FitError::MismatchedLength {
                what: "values",
                expected: n,
                found: values.len(),
            });
        }
        if errors.len() != n {
            return Err(FitError::MismatchedLength {
                what: "errors",
                expected: n,
                found: errors.len(),
            });
        }
        if n == 0 {
            return Err(FitError::InvalidInput("no samples to fit".into()));
        }
        if times.iter().chain(&values).any(|v| !v.is_finite()) {
            return Err(FitError::InvalidInput("non-finite sample".into()));
        }
        if errors.iter().any(|e| !(e.is_finite() && *e > 0.0)) {
            return Err(FitError::InvalidInput("errors must be finite and > 0".into()));
        }
        let stabilization = stabilization.filter(|s| s.enabled).cloned();
        if let Some(stab) = &stabilization {
            if !(stab.step.is_finite() && stab.step > 0.0) {
                return Err(FitError::InvalidInput(format!(
                    "stabilization step must be > 0 (got {})",
                    stab.step
                )));
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
        let mut set = Self {
            times: order.iter().map(|&i| times[i]).collect(),
            values: order.iter().map(|&i| values[i]).collect(),
            errors: order.iter().map(|&i| errors[i]).collect(),
            synthetic: vec![false; n],
            stabilization,
            delta_t: DEFAULT_DELTA_T,
        };
        set.split_coincident();
        if let Some(stab) = set.stabilization.clone() {
            set.add_stabilization(&stab);
        }
        Ok(set)
    }

    /// Merge the included samples of `observations` at their current offsets.
    pub fn merge(observations: &[Observation], stabilization: Option<&StabilizationConfig>) -> FitResult<Self> {
        let total: usize = observations.iter().map(Observation::included_count).sum();
        let mut times = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        let mut errors = Vec::with_capacity(total);
        for obs in observations {
            let eff = obs.effective_values()?;
            for i in obs.included_indices() {
                times.push(obs.times()[i] + obs.time_shift());
                values.push(eff[i]);
                errors.push(obs.errors()[i]);
            }
        }
        Self::from_samples(times, values, errors, stabilization)
    }

    /// Merge again with this set's stabilization settings.
    pub fn remerge(&self, observations: &[Observation]) -> FitResult<Self> {
        Self::merge(observations, self.stabilization.as_ref())
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// `true` for stabilization samples.
    pub fn synthetic(&self) -> &[bool] {
        &self.synthetic
    }

    pub fn real_count(&self) -> usize {
        self.synthetic.iter().filter(|s| !**s).count()
    }

    pub fn stabilization(&self) -> Option<&StabilizationConfig> {
        self.stabilization.as_ref()
    }

    pub fn first_time(&self) -> f64 {
        self.times[0]
    }

    pub fn last_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    /// Make the time axis strictly increasing by nudging repeated times forward.
    fn split_coincident(&mut self) {
        for i in 1..self.times.len() {
            if self.times[i] <= self.times[i - 1] {
                self.times[i] = self.times[i - 1] + self.delta_t;
            }
        }
    }

    fn add_stabilization(&mut self, stab: &StabilizationConfig) {
        let real_errors: Vec<f64> = self.errors.clone();
        let err = match stab.error {
            StabError::Absolute(e) => e.abs(),
            StabError::MedianMultiple(f) => f.abs() * median(&real_errors).unwrap_or(1.0),
        };

        let first = self.first_time();
        let last = self.last_time();
        let n_ext = if stab.extent > 0.0 {
            // Points strictly inside (0, extent).
            ((stab.extent / stab.step).ceil() as usize).saturating_sub(1)
        } else {
            0
        };

        let mut left_t: Vec<f64> = (1..=n_ext).rev().map(|k| first - k as f64 * stab.step).collect();
        let mut left_e = vec![err; left_t.len()];
        let mut right_t: Vec<f64> = (1..=n_ext).map(|k| last + k as f64 * stab.step).collect();
        let mut right_e = vec![err; right_t.len()];
        for i in 1..=stab.ramp_size.min(n_ext) {
            let bump = (stab.ramp_size + 1 - i) as f64 * err * stab.ramp_factor;
            left_e[n_ext - i] += bump;
            right_e[i - 1] += bump;
        }
        let first_value = self.values[0];
        let last_value = self.values[self.values.len() - 1];

        let mut times = Vec::with_capacity(self.len() + 2 * n_ext);
        let mut values = Vec::with_capacity(times.capacity());
        let mut errors = Vec::with_capacity(times.capacity());
        let mut synthetic = Vec::with_capacity(times.capacity());

        values.extend(std::iter::repeat_n(first_value, left_t.len()));
        synthetic.extend(std::iter::repeat_n(true, left_t.len()));
        times.append(&mut left_t);
        errors.append(&mut left_e);

        for i in 0..self.len() {
            if i > 0 {
                let (a, b) = (self.times[i - 1], self.times[i]);
                if b - a > stab.gap {
                    let count = ((b - a) / stab.step).floor() as usize;
                    let fill = linspace(a, b, count);
                    if fill.len() > 2 {
                        let (va, vb) = (self.values[i - 1], self.values[i]);
                        for &t in &fill[1..fill.len() - 1] {
                            times.push(t);
                            values.push(va + (vb - va) * (t - a) / (b - a));
                            errors.push(err);
                            synthetic.push(true);
                        }
                    }
                }
            }
            times.push(self.times[i]);
            values.push(self.values[i]);
            errors.push(self.errors[i]);
            synthetic.push(self.synthetic[i]);
        }

        values.extend(std::iter::repeat_n(last_value, right_t.len()));
        synthetic.extend(std::iter::repeat_n(true, right_t.len()));
        times.append(&mut right_t);
        errors.append(&mut right_e);

        self.times = times;
        self.values = values;
        self.errors = errors;
        self.synthetic = synthetic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_stab() -> Option<&'static StabilizationConfig> {
        None
    }

    #[test]
    fn coincident_times_are_split_deterministically() {
        let set = ObservationSet::from_samples(
            vec![2.0, 1.0, 1.0, 3.0],
            vec![0.2, 0.1, 0.15, 0.3],
            vec![0.1; 4],
            no_stab(),
        )
        .unwrap();
        assert!(set.times().windows(2).all(|w| w[1] > w[0]));
        assert_eq!(set.times()[0], 1.0);
        assert!((set.times()[1] - 1.0 - DEFAULT_DELTA_T).abs() < 1e-12);
        assert_eq!(set.values()[3], 0.3);
    }

    #[test]
    fn extensions_and_gap_fillers_are_marked_synthetic() {
        let stab = StabilizationConfig {
            extent: 20.0,
            gap: 10.0,
            step: 5.0,
            error: StabError::Absolute(2.0),
            ..StabilizationConfig::default()
        };
        let set = ObservationSet::from_samples(
            vec![100.0, 101.0, 131.0],
            vec![1.0, 1.0, 4.0],
            vec![0.1; 3],
            Some(&stab),
        )
        .unwrap();

        // Left: 85, 90, 95; gap 101..131: linspace(101,131,6) interior = 4 points; right: 136,141,146.
        assert_eq!(set.real_count(), 3);
        assert_eq!(set.len(), 3 + 3 + 4 + 3);
        assert_eq!(set.times()[0], 85.0);
        assert_eq!(set.times()[set.len() - 1], 146.0);
        assert!(set.times().windows(2).all(|w| w[1] > w[0]));
        assert!(set.synthetic()[0] && !set.synthetic()[3]);

        // Gap fillers interpolate the neighbours.
        let k = set.times().iter().position(|&t| (t - 107.0).abs() < 1e-9).unwrap();
        assert!(set.synthetic()[k]);
        assert!((set.values()[k] - 1.6).abs() < 1e-9);
        assert_eq!(set.errors()[k], 2.0);

        // Extensions copy the edge values.
        assert_eq!(set.values()[0], 1.0);
        assert_eq!(set.values()[set.len() - 1], 4.0);
    }

    #[test]
    fn relative_stabilization_error_uses_the_median() {
        let stab = StabilizationConfig {
            extent: 11.0,
            step: 5.0,
            error: StabError::MedianMultiple(3.0),
            ..StabilizationConfig::default()
        };
        let set =
            ObservationSet::from_samples(vec![0.0, 1.0, 2.0], vec![0.0; 3], vec![0.1, 0.2, 0.3], Some(&stab)).unwrap();
        assert!((set.errors()[0] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn ramp_inflates_errors_next_to_the_data() {
        let stab = StabilizationConfig {
            extent: 16.0,
            step: 5.0,
            ramp_size: 2,
            ramp_factor: 1.0,
            ..StabilizationConfig::default()
        };
        let set = ObservationSet::from_samples(vec![0.0, 1.0], vec![0.0; 2], vec![0.1; 2], Some(&stab)).unwrap();
        // Left extension: -15, -10, -5 with errors 2, 4, 6.
        assert_eq!(&set.errors()[..3], &[2.0, 4.0, 6.0]);
        assert_eq!(&set.errors()[5..], &[6.0, 4.0, 2.0]);
    }

    #[test]
    fn merge_applies_offsets_and_mask() {
        let a = Observation::new("A", vec![0.0, 10.0], vec![1.0, 2.0], vec![0.1, 0.1]).unwrap();
        let mut b = Observation::new("B", vec![0.0, 10.0, 20.0], vec![5.0, 6.0, 7.0], vec![0.2; 3]).unwrap();
        b.set_time_shift(3.0);
        b.set_mag_shift(-4.0);
        b.mask_points(&[2]).unwrap();

        let set = ObservationSet::merge(&[a, b], None).unwrap();
        assert_eq!(set.times(), &[0.0, 3.0, 10.0, 13.0]);
        assert_eq!(set.values(), &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(set.real_count(), 4);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(ObservationSet::from_samples(vec![], vec![], vec![], no_stab()).is_err());
        assert!(matches!(
            ObservationSet::from_samples(vec![1.0], vec![], vec![0.1], no_stab()),
            Err(FitError::MismatchedLength { .. })
        ));
    }
}
