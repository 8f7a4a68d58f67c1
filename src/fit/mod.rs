//! Model fitting and downstream analysis.
//!
//! Responsibilities:
//!
//! - generate the smoothing-parameter grid (`lambda_grid`)
//! - fit the additive mixed model by penalized IRLS and pick the smoothing
//!   parameters by an approximate REML score (`fitter`)
//! - read-only diagnostics over the fitted model (`diagnostics`)
//! - per-age estimate extraction (`estimates`)
//! - breakpoint analysis over the per-age estimates (`segmented`)

pub mod diagnostics;
pub mod estimates;
pub mod fitter;
pub mod lambda_grid;
pub mod segmented;

pub use estimates::*;
pub use fitter::*;
pub use lambda_grid::*;
pub use segmented::*;
