//! Export a run summary to JSON.
//!
//! The export is meant to be easy to consume in notebooks or downstream scripts:
//! the configuration, the estimated and true delays, per-curve offsets and drift
//! parameters, the final knots, and the misfit after every stage.

use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::app::pipeline::{RunConfig, RunOutput};
use crate::error::AppError;
use crate::fit::{Delay, StageRecord};
use crate::models::Drift;
use crate::report::{CurveResiduals, DelayComparison, compare_delays};

/// Per-curve state after the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveSummary {
    pub label: String,
    pub time_shift: f64,
    pub mag_shift: f64,
    pub flux_shift: f64,
    pub drift_kind: Option<&'static str>,
    pub drift_parameters: Vec<f64>,
}

/// Serialized form of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub tool: &'static str,
    pub config: &'a RunConfig,
    pub r2: f64,
    pub delays: &'a [Delay],
    pub comparison: Vec<DelayComparison>,
    pub curves: Vec<CurveSummary>,
    pub residuals: &'a [CurveResiduals],
    pub interior_knots: &'a [f64],
    pub history: &'a [StageRecord],
}

impl<'a> RunSummary<'a> {
    pub fn new(run: &'a RunOutput, config: &'a RunConfig) -> Self {
        let curves = run
            .observations
            .iter()
            .map(|o| CurveSummary {
                label: o.label().to_string(),
                time_shift: o.time_shift(),
                mag_shift: o.mag_shift(),
                flux_shift: o.flux_shift(),
                drift_kind: o.drift().map(|d| d.kind_name()),
                drift_parameters: o.drift().map(|d| d.parameters()).unwrap_or_default(),
            })
            .collect();
        Self {
            tool: "td",
            config,
            r2: run.r2,
            delays: &run.delays,
            comparison: compare_delays(&run.delays, &run.sample.true_delays),
            curves,
            residuals: &run.residuals,
            interior_knots: run.spline.interior_knots(),
            history: &run.history,
        }
    }
}

/// Write the run summary to a JSON file.
pub fn write_run_json(path: &Path, run: &RunOutput, config: &RunConfig) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &RunSummary::new(run, config))
        .map_err(|e| AppError::new(2, format!("Failed to write export JSON: {e}")))?;
    Ok(())
}
