//! Input/output: CSV ingest, result export, and the fitted-model cache.

pub mod cache;
pub mod export;
pub mod ingest;
