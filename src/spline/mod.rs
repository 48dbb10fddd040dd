//! Regression splines with free knots.
//!
//! - `datapoints`: merged, sorted sample sets with stabilization samples
//! - `regression`: the spline itself (basis, weighted solve, evaluation, misfit)
//! - `bok`: interior knot relocation

pub mod bok;
pub mod datapoints;
pub mod regression;

pub use bok::*;
pub use datapoints::*;
pub use regression::*;
