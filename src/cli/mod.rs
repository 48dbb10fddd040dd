//! Command-line parsing for the time-delay estimator.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{Criterion, KnotSearchMethod};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "td", version, about = "Time-delay estimation for multi-image light curves")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Simulate a multi-image data set, align it, and compare delays with the truth.
    Align(AlignArgs),
    /// Print the default run configuration as JSON.
    Config,
}

/// Options for an alignment run. Flags override values loaded from `--config`.
#[derive(Debug, Parser, Clone, Default)]
pub struct AlignArgs {
    /// Run configuration JSON (`sample`, `align`, ...); missing keys take defaults.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Random seed for the simulated data set.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Photometric noise (mag, 1 sigma).
    #[arg(long)]
    pub noise: Option<f64>,

    /// Number of observing seasons.
    #[arg(long)]
    pub seasons: Option<usize>,

    /// Rough-regime iterations.
    #[arg(long)]
    pub rough_iterations: Option<usize>,

    /// Rough-regime knot step (days).
    #[arg(long)]
    pub rough_knot_step: Option<f64>,

    /// Fine-regime iterations.
    #[arg(long)]
    pub fine_iterations: Option<usize>,

    /// Fine-regime knot step (days).
    #[arg(long)]
    pub fine_knot_step: Option<f64>,

    /// Score used by the time-shift searches.
    #[arg(long, value_enum)]
    pub criterion: Option<Criterion>,

    /// Knot relocation strategy of the fine regime.
    #[arg(long, value_enum)]
    pub bok_method: Option<KnotSearchMethod>,

    /// Stop after the rough regime.
    #[arg(long)]
    pub rough_only: bool,

    /// Fit flux offsets after alignment.
    #[arg(long)]
    pub flux_shifts: bool,

    /// Write a JSON run summary.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,
}
