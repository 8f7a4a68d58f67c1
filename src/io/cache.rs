//! Fitted-model cache.
//!
//! The trajectory fit is by far the most expensive stage (PIRLS over a λ
//! grid), so a run can persist its `FitOutput` keyed by the input bytes and
//! the model settings. A later run with the same data and settings reloads
//! the fit and goes straight to extraction and breakpoint analysis.
//!
//! Cache misses are silent: an absent, unreadable, or stale cache file just
//! means we refit. Only *writing* the cache can fail a run.

use std::fs;
use std::hash::Hasher;
use std::path::Path;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

use crate::domain::{FitOutput, ModelConfig};
use crate::error::AppError;

const CACHE_TOOL: &str = "clutch-curves";

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    tool: String,
    key: u64,
    fit: FitOutput,
}

/// Cache key over the raw input bytes and the model settings.
///
/// Any change to either produces a different key, so a stale cache can never
/// be confused with a current one.
pub fn cache_key(csv_bytes: &[u8], config: &ModelConfig) -> Result<u64, AppError> {
    let config_json = serde_json::to_vec(config)
        .map_err(|e| AppError::internal(format!("Failed to serialize model config: {e}")))?;

    let mut hasher = FnvHasher::default();
    hasher.write(csv_bytes);
    hasher.write(&config_json);
    Ok(hasher.finish())
}

/// Load a cached fit if the file exists and its key matches.
pub fn load(path: &Path, key: u64) -> Option<FitOutput> {
    let bytes = fs::read(path).ok()?;
    let cached: CacheFile = serde_json::from_slice(&bytes).ok()?;
    (cached.tool == CACHE_TOOL && cached.key == key).then_some(cached.fit)
}

/// Persist a fit under the given key.
pub fn store(path: &Path, key: u64, fit: &FitOutput) -> Result<(), AppError> {
    let file = CacheFile {
        tool: CACHE_TOOL.to_string(),
        key,
        fit: fit.clone(),
    };
    let json = serde_json::to_string(&file)
        .map_err(|e| AppError::internal(format!("Failed to serialize cache file: {e}")))?;
    fs::write(path, json).map_err(|e| {
        AppError::data_format(format!(
            "Failed to write cache file '{}': {e}",
            path.display()
        ))
    })
}
