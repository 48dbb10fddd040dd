//! Curve alignment.
//!
//! Responsibilities:
//!
//! - score curves against a reference signal
//! - generate trial shift tuples and search them (grid or local descent)
//! - run the alternating alignment stages (rough and fine regimes)

pub mod alignment;
pub mod grid;
pub mod score;
pub mod search;
pub mod steps;

pub use alignment::*;
pub use grid::*;
pub use score::*;
pub use search::*;
pub use steps::*;
