//! Synthetic data generation.

pub mod sample;
