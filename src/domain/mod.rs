//! Shared domain types for the clutch-size age-trajectory analysis.

pub mod types;

pub use types::*;
