//! Input/output helpers.
//!
//! - run summaries as JSON (`export`)

pub mod export;

pub use export::*;
