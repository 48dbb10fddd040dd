//! Building blocks of the alignment loop.
//!
//! Every step works on a slice of curves and (where needed) the shared spline.
//! Steps that try several candidate states evaluate them on copies; only the
//! accepted state is written back.

use log::{debug, trace};

use crate::domain::{
    BokConfig, Criterion, Observation, SplineFitConfig, set_time_shifts, split_seasons, time_shifts,
};
use crate::error::{FitError, FitResult};
use crate::fit::grid::linspace;
use crate::fit::score::{curve_misfit, residual_variation};
use crate::fit::search::ShiftMethod;
use crate::math::{SimplexOptions, median, nelder_mead};
use crate::models::{Drift, DriftFitOptions, DriftTarget};
use crate::spline::{DataUpdate, KnotOptimizer, Norm, ObservationSet, RegressionSpline};

/// Absolute tolerance of the magnitude-offset descent.
const MAG_SHIFT_XTOL: f64 = 0.001;

/// Align every curve but the first on the first one's median (drift excluded).
pub fn align_medians(observations: &mut [Observation]) -> FitResult<()> {
    let Some((first, rest)) = observations.split_first_mut() else {
        return Ok(());
    };
    let reference = included_median(first)?;
    for obs in rest {
        let m = included_median(obs)?;
        obs.set_mag_shift(obs.mag_shift() + reference - m);
    }
    Ok(())
}

fn included_median(obs: &Observation) -> FitResult<f64> {
    let values = obs.values_without_drift()?;
    let included: Vec<f64> = obs.included_indices().iter().map(|&i| values[i]).collect();
    median(&included).ok_or_else(|| FitError::InvalidInput(format!("curve '{}' has no included samples", obs.label())))
}

/// Fit each curve's magnitude offset to the spline, minimizing the L1 misfit.
pub fn optimize_mag_shifts(observations: &mut [Observation], spline: &RegressionSpline) -> FitResult<()> {
    let options = SimplexOptions {
        xatol: MAG_SHIFT_XTOL,
        fatol: 1e-4,
        max_evals: Some(200),
    };
    for obs in observations.iter_mut() {
        let eff = obs.effective_values().map_err(|e| e.in_observation(obs.label()))?;
        let current = obs.mag_shift();
        let shifted = obs.shifted_times();
        // (value without mag shift, spline value, error) per included sample
        let samples: Vec<(f64, f64, f64)> = obs
            .included_indices()
            .into_iter()
            .map(|i| (eff[i] - current, spline.evaluate(shifted[i]), obs.errors()[i]))
            .collect();
        let l1 = |p: &[f64]| samples.iter().map(|(v, s, e)| (v + p[0] - s).abs() / e).sum::<f64>();
        let best = nelder_mead(l1, &[current], &options);
        trace!("{}: mag shift {current:.4} -> {:.4}", obs.label(), best.x[0]);
        obs.set_mag_shift(best.x[0]);
    }
    Ok(())
}

/// Fit flux and magnitude offsets of every curve but the first to the spline.
///
/// The simplex works on `(flux_shift / |min_flux_shift|, mag_shift / 0.1)`; flux
/// shifts below 99% of the curve's minimum are clamped there.
pub fn optimize_flux_shifts(observations: &mut [Observation], spline: &RegressionSpline) -> FitResult<()> {
    for obs in observations.iter_mut().skip(1) {
        let floor = 0.99 * obs.min_flux_shift();
        let scale = obs.min_flux_shift().abs();
        if scale == 0.0 {
            continue;
        }
        let base = obs.clone();
        let trial = |p: &[f64]| -> FitResult<Observation> {
            let mut candidate = base.clone();
            candidate.set_flux_shift((p[0] * scale).max(floor), false)?;
            candidate.set_mag_shift(p[1] * 0.1);
            Ok(candidate)
        };
        let score = |p: &[f64]| {
            trial(p)
                .and_then(|c| curve_misfit(&c, spline, Norm::L2))
                .unwrap_or(f64::INFINITY)
        };
        let start = [obs.flux_shift() / scale, obs.mag_shift() / 0.1];
        let best = nelder_mead(score, &start, &SimplexOptions::default());
        if best.value.is_finite() {
            *obs = trial(&best.x).map_err(|e| e.in_observation(base.label()))?;
            debug!(
                "{}: flux shift {:.3e}, mag shift {:.4}",
                obs.label(),
                obs.flux_shift(),
                obs.mag_shift()
            );
        }
    }
    Ok(())
}

/// Rebuild the spline's data from the curves and refit it.
///
/// Runs `bok.iterations` knot relocation passes, or a single solve when that is
/// zero. Returns the misfit of the real samples.
pub fn fit_source(observations: &[Observation], spline: &mut RegressionSpline, bok: &BokConfig) -> FitResult<f64> {
    let data = spline.data().remerge(observations)?;
    spline.update_data(data, DataUpdate::AdjustExtremes)?;
    if bok.iterations > 0 {
        let mut optimizer = KnotOptimizer::new(bok)?;
        for _ in 0..bok.iterations {
            spline.relocate_knots(&mut optimizer)?;
        }
    } else {
        spline.solve_coefficients()?;
    }
    spline.residual_sum_of_squares(true)
}

/// Refit the drift model of one curve (no-op without one).
///
/// On failure the curve keeps its previous drift parameters.
pub fn fit_drift(obs: &mut Observation, spline: &RegressionSpline, options: &DriftFitOptions) -> FitResult<()> {
    let Some(mut drift) = obs.take_drift() else {
        return Ok(());
    };
    let result = DriftTarget::against(obs, spline).and_then(|target| drift.fit(&target, options));
    obs.set_drift(drift);
    result.map_err(|e| e.in_observation(obs.label()))
}

/// Refit the drift models of all curves.
pub fn fit_drifts(observations: &mut [Observation], spline: &RegressionSpline, options: &DriftFitOptions) -> FitResult<()> {
    observations.iter_mut().try_for_each(|obs| fit_drift(obs, spline, options))
}

/// Settings of the per-curve time-shift search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftSearchOptions {
    pub method: ShiftMethod,
    /// Refit the curve's drift at every trial shift.
    pub refit_drift: Option<DriftFitOptions>,
    pub criterion: Criterion,
}

/// Curve at `shift`, with its drift refitted if requested.
fn shifted_copy(
    obs: &Observation,
    spline: &RegressionSpline,
    shift: f64,
    refit_drift: Option<&DriftFitOptions>,
) -> FitResult<Observation> {
    let mut trial = obs.clone();
    trial.set_time_shift(shift);
    if let Some(options) = refit_drift {
        fit_drift(&mut trial, spline, options)?;
    }
    Ok(trial)
}

fn criterion_score(obs: &Observation, spline: &RegressionSpline, criterion: Criterion) -> FitResult<f64> {
    match criterion {
        Criterion::R2 => curve_misfit(obs, spline, Norm::L2),
        Criterion::Tv => residual_variation(std::slice::from_ref(obs), spline, true).map(|v| v.total_variation),
    }
}

/// Search the time shift of each curve against the fixed spline.
///
/// The spline no longer matches the curves afterwards; refit it before trusting
/// its misfit.
pub fn optimize_time_shifts(
    observations: &mut [Observation],
    spline: &RegressionSpline,
    options: &ShiftSearchOptions,
) -> FitResult<()> {
    let searcher = options.method.searcher();
    for i in 0..observations.len() {
        let accepted = {
            let obs = &observations[i];
            let objective = |p: &[f64]| {
                shifted_copy(obs, spline, p[0], options.refit_drift.as_ref())
                    .and_then(|trial| criterion_score(&trial, spline, options.criterion))
                    .unwrap_or(f64::INFINITY)
            };
            let outcome = searcher
                .minimize(&[obs.time_shift()], &objective)
                .map_err(|e| e.in_observation(obs.label()))?;
            trace!(
                "{}: time shift {:.3} -> {:.3} ({} trials, score {:.4})",
                obs.label(),
                obs.time_shift(),
                outcome.shifts[0],
                outcome.evaluations,
                outcome.score
            );
            shifted_copy(obs, spline, outcome.shifts[0], options.refit_drift.as_ref())?
        };
        observations[i] = accepted;
    }
    Ok(())
}

/// Settings of the joint time-shift search.
#[derive(Debug, Clone, PartialEq)]
pub struct JointShiftOptions {
    pub method: ShiftMethod,
    /// Search the first curve's shift too (otherwise it is the anchor).
    pub include_first: bool,
    /// Source fit run for every trial.
    pub bok: BokConfig,
    /// Drift refit (followed by a second source fit) for every trial.
    pub refit_drift: Option<DriftFitOptions>,
}

/// Curves and spline after a full source (and drift) fit at the given shifts.
fn joint_trial(
    observations: &[Observation],
    spline: &RegressionSpline,
    shifts: &[f64],
    options: &JointShiftOptions,
) -> FitResult<(Vec<Observation>, RegressionSpline, f64)> {
    let mut curves = observations.to_vec();
    let mut spline = spline.clone();
    set_time_shifts(&mut curves, shifts, options.include_first)?;
    let mut r2 = fit_source(&curves, &mut spline, &options.bok)?;
    if let Some(drift) = &options.refit_drift {
        fit_drifts(&mut curves, &spline, drift)?;
        r2 = fit_source(&curves, &mut spline, &options.bok)?;
    }
    Ok((curves, spline, r2))
}

/// Search all time shifts at once, refitting the spline for every trial.
///
/// Returns the misfit of the accepted state.
pub fn optimize_time_shifts_jointly(
    observations: &mut [Observation],
    spline: &mut RegressionSpline,
    options: &JointShiftOptions,
) -> FitResult<f64> {
    let skip = usize::from(!options.include_first);
    let initial: Vec<f64> = time_shifts(observations).into_iter().skip(skip).collect();
    let outcome = {
        let curves: &[Observation] = observations;
        let reference: &RegressionSpline = spline;
        let objective = |p: &[f64]| {
            joint_trial(curves, reference, p, options)
                .map(|(_, _, r2)| r2)
                .unwrap_or(f64::INFINITY)
        };
        options.method.searcher().minimize(&initial, &objective)?
    };
    debug!(
        "joint shifts {:?} ({} trials, r2 {:.4})",
        outcome.shifts, outcome.evaluations, outcome.score
    );
    let (curves, fitted, r2) = joint_trial(observations, spline, &outcome.shifts, options)?;
    for (slot, curve) in observations.iter_mut().zip(curves) {
        *slot = curve;
    }
    *spline = fitted;
    Ok(r2)
}

/// Fit a new spline through the curves.
pub fn fit_spline(observations: &[Observation], config: &SplineFitConfig) -> FitResult<RegressionSpline> {
    let data = ObservationSet::merge(observations, Some(&config.stabilization))?;
    let mut spline = RegressionSpline::new(data, config.degree, &config.knots)?;
    if config.bok.iterations > 0 {
        let mut optimizer = KnotOptimizer::new(&config.bok)?;
        for _ in 0..config.bok.iterations {
            spline.relocate_knots(&mut optimizer)?;
        }
    } else {
        spline.solve_coefficients()?;
    }
    let r2 = spline.residual_sum_of_squares(true)?;
    debug!(
        "spline fit: {} interior knots over {} samples, r2 {r2:.4}",
        spline.interior_knots().len(),
        spline.data().real_count()
    );
    Ok(spline)
}

/// Knots following the seasons of the merged, shifted curves.
///
/// A knot every `step` days inside each season (starting at the season start),
/// and `in_gap` evenly spaced knots inside each gap wider than `season_gap`. Only
/// knots strictly inside the merged time range are returned.
pub fn season_knots(observations: &[Observation], step: f64, in_gap: usize, season_gap: f64) -> FitResult<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(FitError::InvalidInput(format!("knot step must be > 0 (got {step})")));
    }
    let mut times: Vec<f64> = observations
        .iter()
        .flat_map(|o| {
            let shift = o.time_shift();
            o.included_indices().into_iter().map(move |i| o.times()[i] + shift)
        })
        .collect();
    times.sort_by(f64::total_cmp);
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return Err(FitError::InvalidInput("no samples to place knots on".into()));
    };

    let seasons = split_seasons(&times, season_gap);
    let mut knots = Vec::new();
    for (k, season) in seasons.iter().enumerate() {
        let (a, b) = season.span(&times);
        let mut t = a;
        while t < b {
            knots.push(t);
            t += step;
        }
        if let Some(next) = seasons.get(k + 1) {
            let gap = linspace(b, times[next.start], in_gap + 2);
            knots.extend_from_slice(&gap[1..gap.len() - 1]);
        }
    }
    knots.retain(|&t| t > first && t < last);
    knots.sort_by(f64::total_cmp);
    knots.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    Ok(knots)
}
