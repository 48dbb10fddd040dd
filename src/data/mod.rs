//! Data sources.
//!
//! Curves are produced in memory; reading survey files is left to callers, who
//! build [`crate::domain::Observation`]s directly.

pub mod sample;

pub use sample::*;
