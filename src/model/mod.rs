//! Trajectory-model construction.
//!
//! - design-matrix assembly with a stable term-to-column map (`design`)
//! - quasi-Poisson response family on the log link (`family`)

pub mod design;
pub mod family;

pub use design::*;
pub use family::*;
