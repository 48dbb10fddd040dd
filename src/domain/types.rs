//! Shared configuration types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - built from CLI flags
//! - loaded from / written to JSON config files
//! - embedded in run exports for reproducibility
//!
//! Defaults reproduce the usual settings of the rough and fine alignment regimes.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::math::SimplexOptions;

/// Error assigned to synthetic stabilization samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabError {
    /// Fixed error in magnitudes.
    Absolute(f64),
    /// Multiple of the median error of the real samples.
    MedianMultiple(f64),
}

/// Where and how synthetic stabilization samples are added to a merged data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationConfig {
    pub enabled: bool,
    /// Days covered by the flat extensions before the first and after the last sample.
    pub extent: f64,
    /// Gaps wider than this (days) are filled.
    pub gap: f64,
    /// Spacing (days) of synthetic samples.
    pub step: f64,
    pub error: StabError,
    /// Number of extension samples next to the data whose error is inflated.
    pub ramp_size: usize,
    pub ramp_factor: f64,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extent: 300.0,
            gap: 20.0,
            step: 5.0,
            error: StabError::Absolute(2.0),
            ramp_size: 0,
            ramp_factor: 1.0,
        }
    }
}

impl StabilizationConfig {
    /// Gap filling only (used by drift splines, which must not extrapolate).
    pub fn gaps_only(gap: f64, step: f64, error: StabError) -> Self {
        Self {
            enabled: true,
            extent: 0.0,
            gap,
            step,
            error,
            ramp_size: 0,
            ramp_factor: 1.0,
        }
    }
}

/// Strategy used to try new positions for one knot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KnotSearchMethod {
    /// Equally spaced positions across the knot's bounds.
    Scan,
    /// Uniform random positions across the bounds (seeded).
    Random,
    /// Bounded Brent minimization of the misfit.
    Local,
}

/// Knot relocation ("bounded optimal knots") settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BokConfig {
    /// Number of relocation passes.
    pub iterations: usize,
    /// Minimum distance (days) a knot keeps from the midpoints to its neighbours.
    pub eps: f64,
    /// Trial positions per knot for `Scan` / `Random`.
    pub tests: usize,
    /// Optional maximum excursion window (days) around the current position.
    pub window: Option<f64>,
    pub method: KnotSearchMethod,
    /// Seed for `Random`.
    pub seed: u64,
}

impl Default for BokConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            eps: 2.0,
            tests: 5,
            window: None,
            method: KnotSearchMethod::Scan,
            seed: 0,
        }
    }
}

/// Initial interior knot placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnotPlacement {
    /// Roughly one knot every `step` days.
    Step(f64),
    /// Exactly this many uniformly spaced interior knots.
    Count(usize),
    /// Explicit interior knots.
    Explicit(Vec<f64>),
}

/// Settings for fitting the shared spline to a set of curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineFitConfig {
    pub degree: usize,
    pub knots: KnotPlacement,
    pub stabilization: StabilizationConfig,
    pub bok: BokConfig,
}

impl Default for SplineFitConfig {
    fn default() -> Self {
        Self {
            degree: 3,
            knots: KnotPlacement::Step(20.0),
            stabilization: StabilizationConfig::default(),
            bok: BokConfig::default(),
        }
    }
}

/// What a time-shift trial is scored by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Weighted residual sum of squares against the shared spline.
    R2,
    /// Weighted total variation of the residuals before drift correction.
    Tv,
}

/// Rough regime: coarse knots, integer-day brute-force shifts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoughConfig {
    pub iterations: usize,
    pub knot_step: f64,
    pub stabilization: StabilizationConfig,
    /// Skip the time-shift search entirely (offsets and drifts only).
    pub shift_time: bool,
    pub brute_step: f64,
    pub brute_radius: usize,
    pub criterion: Criterion,
}

impl Default for RoughConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            knot_step: 100.0,
            stabilization: StabilizationConfig {
                step: 4.0,
                ..StabilizationConfig::default()
            },
            shift_time: true,
            brute_step: 1.0,
            brute_radius: 20,
            criterion: Criterion::R2,
        }
    }
}

/// Fine regime: dense knots with relocation, sub-day shifts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FineConfig {
    pub iterations: usize,
    /// Fit a fresh spline even when the optimizer already holds one.
    pub refit_spline: bool,
    pub knot_step: f64,
    pub stabilization: StabilizationConfig,
    pub bok_eps: f64,
    pub bok_tests: usize,
    pub bok_window: Option<f64>,
    pub bok_method: KnotSearchMethod,
    pub bok_seed: u64,
    /// Keep spline drifts flat at both ends during the main iterations.
    pub flat: bool,
    pub brute_step: f64,
    pub brute_radius: usize,
    /// Local descent settings for the per-curve shift refinement.
    pub fmin: ShiftDescent,
    /// Final refinement rounds with flat ends released.
    pub stabilize_iterations: usize,
    pub criterion: Criterion,
}

impl Default for FineConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            refit_spline: true,
            knot_step: 20.0,
            stabilization: StabilizationConfig {
                step: 4.0,
                ..StabilizationConfig::default()
            },
            bok_eps: 10.0,
            bok_tests: 10,
            bok_window: None,
            bok_method: KnotSearchMethod::Scan,
            bok_seed: 0,
            flat: true,
            brute_step: 0.2,
            brute_radius: 10,
            fmin: ShiftDescent::default(),
            stabilize_iterations: 5,
            criterion: Criterion::R2,
        }
    }
}

impl FineConfig {
    /// Source-spline knot relocation settings with `iterations` passes.
    pub fn bok(&self, iterations: usize) -> BokConfig {
        BokConfig {
            iterations,
            eps: self.bok_eps,
            tests: self.bok_tests,
            window: self.bok_window,
            method: self.bok_method,
            seed: self.bok_seed,
        }
    }
}

/// Tolerances of the simplex descent on one time shift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftDescent {
    pub xtol: f64,
    pub ftol: f64,
    pub max_evals: usize,
}

impl Default for ShiftDescent {
    fn default() -> Self {
        Self {
            xtol: 0.1,
            ftol: 0.1,
            max_evals: 100,
        }
    }
}

impl From<ShiftDescent> for SimplexOptions {
    fn from(d: ShiftDescent) -> Self {
        SimplexOptions {
            xatol: d.xtol,
            fatol: d.ftol,
            max_evals: Some(d.max_evals),
        }
    }
}

/// Full alignment run: rough, then fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlignConfig {
    pub rough: RoughConfig,
    pub fine: FineConfig,
}
