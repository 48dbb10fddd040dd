//! The alternating alignment loop.
//!
//! [`AlignmentOptimizer`] owns the curves and the shared spline and runs named
//! stages over them:
//!
//! - `MagShift`: magnitude offsets (medians without a spline, L1 fit with one)
//! - `SourceFit`: rebuild the spline's data from the curves and refit it
//! - `DriftFit`: refit each curve's drift model against the spline
//! - `TimeShiftSearch` / `Stabilize`: per-curve time-shift search
//!
//! A time-shift search leaves the spline *stale*: its misfit no longer describes
//! the curves, and [`AlignmentOptimizer::last_r2`] refuses to report it until the
//! next source fit.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AlignConfig, BokConfig, FineConfig, KnotPlacement, Observation, RoughConfig, SplineFitConfig, time_shifts,
};
use crate::error::{FitError, FitResult};
use crate::fit::search::ShiftMethod;
use crate::fit::steps::{
    JointShiftOptions, ShiftSearchOptions, align_medians, fit_drifts, fit_source, fit_spline, optimize_flux_shifts,
    optimize_mag_shifts, optimize_time_shifts, optimize_time_shifts_jointly,
};
use crate::models::DriftFitOptions;
use crate::spline::RegressionSpline;

/// Named stage of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MagShift,
    FluxShift,
    SplineFit,
    SourceFit,
    DriftFit,
    TimeShiftSearch,
    Stabilize,
}

/// State after one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    /// Misfit of the real samples; `None` while the spline is stale or absent.
    pub r2: Option<f64>,
    pub shifts: Vec<f64>,
}

/// Delay between two curves: `shift(to) − shift(from)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub from: String,
    pub to: String,
    pub days: f64,
}

impl Delay {
    /// Pair name, e.g. `AB`.
    pub fn name(&self) -> String {
        format!("{}{}", self.from, self.to)
    }
}

/// Delays for every pair `(i, j)`, `i < j`, optionally after sorting by label.
pub fn delays(observations: &[Observation], sort_by_label: bool) -> Vec<Delay> {
    let mut order: Vec<&Observation> = observations.iter().collect();
    if sort_by_label {
        order.sort_by(|a, b| a.label().cmp(b.label()));
    }
    let mut out = Vec::with_capacity(order.len() * order.len().saturating_sub(1) / 2);
    for (i, a) in order.iter().enumerate() {
        for b in &order[i + 1..] {
            out.push(Delay {
                from: a.label().to_string(),
                to: b.label().to_string(),
                days: b.time_shift() - a.time_shift(),
            });
        }
    }
    out
}

fn format_delays(observations: &[Observation]) -> String {
    delays(observations, false)
        .iter()
        .map(|d| format!("{} {:+.2}", d.name(), d.days))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs the alignment stages over owned curves and an optional shared spline.
#[derive(Debug, Clone)]
pub struct AlignmentOptimizer {
    observations: Vec<Observation>,
    spline: Option<RegressionSpline>,
    stale: bool,
    history: Vec<StageRecord>,
}

impl AlignmentOptimizer {
    pub fn new(observations: Vec<Observation>) -> FitResult<Self> {
        if observations.is_empty() {
            return Err(FitError::InvalidInput("nothing to align".into()));
        }
        Ok(Self {
            observations,
            spline: None,
            stale: false,
            history: Vec::new(),
        })
    }

    /// Start from an existing spline (treated as up to date).
    pub fn with_spline(observations: Vec<Observation>, spline: RegressionSpline) -> FitResult<Self> {
        let mut optimizer = Self::new(observations)?;
        optimizer.spline = Some(spline);
        Ok(optimizer)
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn spline(&self) -> Option<&RegressionSpline> {
        self.spline.as_ref()
    }

    /// True between a time-shift search and the next source fit.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn into_parts(self) -> (Vec<Observation>, Option<RegressionSpline>) {
        (self.observations, self.spline)
    }

    /// Misfit of the real samples from the latest source fit.
    pub fn last_r2(&self) -> FitResult<f64> {
        if self.stale {
            return Err(FitError::StaleSpline);
        }
        self.spline
            .as_ref()
            .and_then(RegressionSpline::last_r2_nostab)
            .ok_or(FitError::UnsolvedSpline)
    }

    pub fn delays(&self, sort_by_label: bool) -> Vec<Delay> {
        delays(&self.observations, sort_by_label)
    }

    /// The spline, provided it still describes the curves.
    fn fresh_spline(&self) -> FitResult<&RegressionSpline> {
        if self.stale {
            return Err(FitError::StaleSpline);
        }
        self.spline.as_ref().ok_or(FitError::UnsolvedSpline)
    }

    fn record(&mut self, stage: Stage) {
        let r2 = self.last_r2().ok();
        self.history.push(StageRecord {
            stage,
            r2,
            shifts: time_shifts(&self.observations),
        });
    }

    /// MAGSHIFT stage.
    pub fn mag_shift(&mut self) -> FitResult<()> {
        match &self.spline {
            None => align_medians(&mut self.observations)?,
            Some(_) => {
                let spline = self.fresh_spline()?.clone();
                optimize_mag_shifts(&mut self.observations, &spline)?;
            }
        }
        self.record(Stage::MagShift);
        Ok(())
    }

    /// Flux and magnitude offsets of every curve but the first.
    pub fn flux_shift(&mut self) -> FitResult<()> {
        let spline = self.fresh_spline()?.clone();
        optimize_flux_shifts(&mut self.observations, &spline)?;
        self.record(Stage::FluxShift);
        Ok(())
    }

    /// Replace the spline by a new fit through all curves.
    pub fn fit_spline(&mut self, config: &SplineFitConfig) -> FitResult<f64> {
        let spline = fit_spline(&self.observations, config)?;
        self.install(spline)
    }

    /// Replace the spline by a new fit through the curves at `indices` only.
    pub fn fit_spline_on(&mut self, indices: &[usize], config: &SplineFitConfig) -> FitResult<f64> {
        let subset = indices
            .iter()
            .map(|&i| {
                self.observations.get(i).cloned().ok_or_else(|| {
                    FitError::InvalidInput(format!("no curve at index {i} ({} curves)", self.observations.len()))
                })
            })
            .collect::<FitResult<Vec<_>>>()?;
        let spline = fit_spline(&subset, config)?;
        self.install(spline)
    }

    fn install(&mut self, spline: RegressionSpline) -> FitResult<f64> {
        let r2 = spline.last_r2_nostab().ok_or(FitError::UnsolvedSpline)?;
        self.spline = Some(spline);
        self.stale = false;
        self.record(Stage::SplineFit);
        Ok(r2)
    }

    /// SOURCE_FIT stage. Clears the stale flag.
    pub fn source_fit(&mut self, bok: &BokConfig) -> FitResult<f64> {
        let spline = self.spline.as_mut().ok_or(FitError::UnsolvedSpline)?;
        let r2 = fit_source(&self.observations, spline, bok)?;
        self.stale = false;
        self.record(Stage::SourceFit);
        Ok(r2)
    }

    /// DRIFT_FIT stage.
    pub fn drift_fit(&mut self, options: &DriftFitOptions) -> FitResult<()> {
        let spline = self.fresh_spline()?.clone();
        fit_drifts(&mut self.observations, &spline, options)?;
        self.record(Stage::DriftFit);
        Ok(())
    }

    /// TIMESHIFT_SEARCH stage. Leaves the spline stale.
    pub fn time_shift_search(&mut self, options: &ShiftSearchOptions) -> FitResult<()> {
        self.search_shifts(Stage::TimeShiftSearch, options)
    }

    fn search_shifts(&mut self, stage: Stage, options: &ShiftSearchOptions) -> FitResult<()> {
        let spline = self.fresh_spline()?.clone();
        optimize_time_shifts(&mut self.observations, &spline, options)?;
        self.stale = true;
        self.record(stage);
        Ok(())
    }

    /// Joint search over all shifts; every trial refits the spline, so the
    /// spline is up to date afterwards.
    pub fn joint_time_shift_search(&mut self, options: &JointShiftOptions) -> FitResult<f64> {
        if self.stale {
            return Err(FitError::StaleSpline);
        }
        let spline = self.spline.as_mut().ok_or(FitError::UnsolvedSpline)?;
        let r2 = optimize_time_shifts_jointly(&mut self.observations, spline, options)?;
        self.record(Stage::TimeShiftSearch);
        Ok(r2)
    }

    /// Curves the rough regime builds its first spline on: those without drift,
    /// or the first curve when every curve drifts.
    pub fn rough_anchors(&self) -> Vec<usize> {
        let free: Vec<usize> = (0..self.observations.len())
            .filter(|&i| !self.observations[i].has_drift())
            .collect();
        if free.is_empty() { vec![0] } else { free }
    }

    /// Rough regime: coarse knots, no knot relocation, brute-force shifts.
    pub fn run_rough(&mut self, config: &RoughConfig) -> FitResult<f64> {
        let spline_config = SplineFitConfig {
            knots: KnotPlacement::Step(config.knot_step),
            stabilization: config.stabilization.clone(),
            bok: BokConfig {
                iterations: 0,
                ..BokConfig::default()
            },
            ..SplineFitConfig::default()
        };
        let solve_only = spline_config.bok.clone();
        let flat_drift = DriftFitOptions {
            bok_iterations: 0,
            flat: true,
        };
        let search = ShiftSearchOptions {
            method: ShiftMethod::Brute {
                step: config.brute_step,
                radius: config.brute_radius,
            },
            refit_drift: None,
            criterion: config.criterion,
        };

        align_medians(&mut self.observations)?;
        self.record(Stage::MagShift);
        let anchors = self.rough_anchors();
        debug!("rough: first spline through curves {anchors:?}");
        self.fit_spline_on(&anchors, &spline_config)?;
        self.drift_fit(&flat_drift)?;
        self.fit_spline(&spline_config)?;
        self.drift_fit(&flat_drift)?;
        let mut r2 = self.source_fit(&solve_only)?;

        for it in 0..config.iterations {
            if config.shift_time {
                self.time_shift_search(&search)?;
            }
            self.source_fit(&solve_only)?;
            self.drift_fit(&flat_drift)?;
            r2 = self.source_fit(&solve_only)?;
            debug!(
                "rough iteration {}/{}: r2 {r2:.4}, delays {}",
                it + 1,
                config.iterations,
                format_delays(&self.observations)
            );
        }
        info!("rough alignment done: r2 {r2:.4}, delays {}", format_delays(&self.observations));
        Ok(r2)
    }

    /// Fine regime: dense relocated knots, sub-day shifts with drift refits, then
    /// stabilization rounds with the drift ends released.
    pub fn run_fine(&mut self, config: &FineConfig) -> FitResult<f64> {
        if config.refit_spline || self.spline.is_none() {
            let spline_config = SplineFitConfig {
                knots: KnotPlacement::Step(config.knot_step),
                stabilization: config.stabilization.clone(),
                bok: config.bok(2),
                ..SplineFitConfig::default()
            };
            self.fit_spline(&spline_config)?;
        } else if self.stale {
            self.source_fit(&config.bok(0))?;
        }
        let drift = |bok_iterations, flat| DriftFitOptions { bok_iterations, flat };
        self.drift_fit(&drift(2, config.flat))?;

        let brute = ShiftSearchOptions {
            method: ShiftMethod::Brute {
                step: config.brute_step,
                radius: config.brute_radius,
            },
            refit_drift: Some(drift(0, config.flat)),
            criterion: config.criterion,
        };
        let descent = ShiftSearchOptions {
            method: ShiftMethod::Descent(config.fmin),
            ..brute
        };
        let solve_only = config.bok(0);

        let mut r2 = self.source_fit(&solve_only)?;
        for it in 0..config.iterations {
            self.time_shift_search(&brute)?;
            self.source_fit(&solve_only)?;
            self.time_shift_search(&descent)?;
            self.source_fit(&solve_only)?;
            self.drift_fit(&drift(1, config.flat))?;
            r2 = self.source_fit(&config.bok(1))?;
            debug!(
                "fine iteration {}/{}: r2 {r2:.4}, delays {}",
                it + 1,
                config.iterations,
                format_delays(&self.observations)
            );
        }

        let released = ShiftSearchOptions {
            refit_drift: Some(drift(0, false)),
            ..descent
        };
        for _ in 0..config.stabilize_iterations {
            self.search_shifts(Stage::Stabilize, &released)?;
            r2 = self.source_fit(&solve_only)?;
        }
        info!("fine alignment done: r2 {r2:.4}, delays {}", format_delays(&self.observations));
        Ok(r2)
    }

    /// Rough then fine.
    pub fn run(&mut self, config: &AlignConfig) -> FitResult<f64> {
        self.run_rough(&config.rough)?;
        self.run_fine(&config.fine)
    }
}
