//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - light curves with their adjustable offsets (`Observation`)
//! - observing seasons (`Season`)
//! - serializable configuration for spline fits and the alignment regimes

pub mod lightcurve;
pub mod season;
pub mod types;

pub use lightcurve::*;
pub use season::*;
pub use types::*;
