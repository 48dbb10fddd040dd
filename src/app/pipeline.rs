//! Shared "alignment pipeline" logic.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! simulation -> rough alignment -> fine alignment -> offsets -> residuals
//!
//! Front-ends then focus on presentation (printing vs exporting).

use serde::{Deserialize, Serialize};

use crate::data::{SampleConfig, SampleData, generate_sample};
use crate::domain::{AlignConfig, BokConfig, Observation};
use crate::error::AppError;
use crate::fit::{AlignmentOptimizer, Delay, StageRecord};
use crate::report::{CurveResiduals, compute_residuals};
use crate::spline::RegressionSpline;

/// Everything a run needs; every section defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    pub sample: SampleConfig,
    pub align: AlignConfig,
    /// Stop after the rough regime.
    pub rough_only: bool,
    /// Fit flux offsets (and refit the spline) after alignment.
    pub flux_shifts: bool,
}

/// All computed outputs of a single `td align` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub sample: SampleData,
    pub observations: Vec<Observation>,
    pub spline: RegressionSpline,
    pub r2: f64,
    /// Estimated delays, pairs sorted by label.
    pub delays: Vec<Delay>,
    pub history: Vec<StageRecord>,
    pub residuals: Vec<CurveResiduals>,
}

/// Execute the full pipeline and return the computed outputs.
pub fn run_alignment(config: &RunConfig) -> Result<RunOutput, AppError> {
    // 1) Simulate the curves.
    let sample = generate_sample(&config.sample)?;

    // 2) Align: rough, then fine.
    let mut optimizer = AlignmentOptimizer::new(sample.observations.clone())?;
    let mut r2 = optimizer.run_rough(&config.align.rough)?;
    if !config.rough_only {
        r2 = optimizer.run_fine(&config.align.fine)?;
    }

    // 3) Optional flux offsets, followed by a source refit so the misfit is current.
    if config.flux_shifts {
        optimizer.flux_shift()?;
        r2 = optimizer.source_fit(&BokConfig {
            iterations: 0,
            ..BokConfig::default()
        })?;
    }

    let delays = optimizer.delays(true);
    let history = optimizer.history().to_vec();
    let (observations, spline) = optimizer.into_parts();
    let spline = spline.ok_or_else(|| AppError::new(4, "Alignment finished without a spline."))?;

    // 4) Residuals per curve.
    let residuals = compute_residuals(&observations, &spline)?;

    Ok(RunOutput {
        sample,
        observations,
        spline,
        r2,
        delays,
        history,
        residuals,
    })
}
