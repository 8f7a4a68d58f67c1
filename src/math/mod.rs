//! Mathematical utilities: spline bases, penalized least squares, and
//! distribution helpers.

pub mod basis;
pub mod ols;
pub mod stats;

pub use basis::*;
pub use ols::*;
pub use stats::*;
