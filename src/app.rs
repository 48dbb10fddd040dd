//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - assembles the run configuration (defaults, JSON file, flag overrides)
//! - runs the alignment pipeline
//! - prints reports and writes optional exports

use std::fs::File;
use std::path::Path;

use clap::Parser;

use crate::cli::{AlignArgs, Command};
use crate::error::AppError;

pub mod pipeline;

use pipeline::RunConfig;

/// Entry point for the `td` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Align(args) => handle_align(args),
        Command::Config => handle_config(),
    }
}

fn handle_align(args: AlignArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args)?;
    let run = pipeline::run_alignment(&config)?;

    println!("{}", crate::report::format_run_summary(&run, &config));
    println!("{}", crate::report::format_delays(&run));
    println!("{}", crate::report::format_residuals(&run.residuals));

    if let Some(path) = &args.export {
        crate::io::write_run_json(path, &run, &config)?;
    }
    Ok(())
}

fn handle_config() -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(&RunConfig::default())
        .map_err(|e| AppError::new(4, format!("Failed to serialize default config: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Load the run configuration (or defaults) and apply flag overrides.
pub fn run_config_from_args(args: &AlignArgs) -> Result<RunConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => read_run_config(path)?,
        None => RunConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.sample.seed = seed;
    }
    if let Some(noise) = args.noise {
        config.sample.noise = noise;
    }
    if let Some(seasons) = args.seasons {
        config.sample.seasons = seasons;
    }
    let align = &mut config.align;
    if let Some(n) = args.rough_iterations {
        align.rough.iterations = n;
    }
    if let Some(step) = args.rough_knot_step {
        align.rough.knot_step = step;
    }
    if let Some(n) = args.fine_iterations {
        align.fine.iterations = n;
    }
    if let Some(step) = args.fine_knot_step {
        align.fine.knot_step = step;
    }
    if let Some(criterion) = args.criterion {
        align.rough.criterion = criterion;
        align.fine.criterion = criterion;
    }
    if let Some(method) = args.bok_method {
        align.fine.bok_method = method;
    }
    config.rough_only |= args.rough_only;
    config.flux_shifts |= args.flux_shifts;

    Ok(config)
}

/// Read a run configuration JSON file; missing keys take defaults.
pub fn read_run_config(path: &Path) -> Result<RunConfig, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open config '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid config '{}': {e}", path.display())))
}
