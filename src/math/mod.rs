//! Mathematical utilities: B-spline basis, least squares, minimizers.

pub mod basis;
pub mod minimize;
pub mod ols;
pub mod stats;

pub use basis::*;
pub use minimize::*;
pub use ols::*;
pub use stats::*;
