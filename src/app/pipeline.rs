//! Shared analysis pipeline used by the `fit` and `ages` front-ends.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> (cached) model fit -> per-age extraction -> breakpoint analysis
//!
//! The command handlers can then focus on presentation and exports.

use std::fs;

use crate::domain::{BreakpointAnalysis, FitConfig, FitOutput, PerAgeEstimate};
use crate::error::AppError;
use crate::fit::estimates::per_age_estimates;
use crate::fit::fitter::fit_trajectory_model;
use crate::fit::segmented::analyze_breakpoint;
use crate::io::cache;
use crate::io::ingest::{self, IngestedData};

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedData,
    pub fit: FitOutput,
    pub estimates: Vec<PerAgeEstimate>,
    pub breakpoint: BreakpointAnalysis,
    /// The model fit was reloaded from the cache rather than computed.
    pub from_cache: bool,
}

/// Execute the full analysis pipeline and return the computed outputs.
pub fn run_analysis(config: &FitConfig) -> Result<RunOutput, AppError> {
    // Read the file once: the same bytes feed the parser and the cache key.
    let csv_bytes = fs::read(&config.csv_path).map_err(|e| {
        AppError::data_format(format!(
            "Failed to read CSV '{}': {e}",
            config.csv_path.display()
        ))
    })?;

    let ingest = ingest::from_reader(csv_bytes.as_slice())?;
    if ingest.records.is_empty() {
        return Err(AppError::insufficient_data(
            "No eligible rows: every female in the dataset is still alive (unknown lifespan).",
        ));
    }

    let (fit, from_cache) = fit_or_load(config, &csv_bytes, &ingest)?;

    let estimates = per_age_estimates(&fit.per_obs)?;
    let breakpoint = analyze_breakpoint(&estimates, &config.breakpoint)?;

    Ok(RunOutput {
        ingest,
        fit,
        estimates,
        breakpoint,
        from_cache,
    })
}

fn fit_or_load(
    config: &FitConfig,
    csv_bytes: &[u8],
    ingest: &IngestedData,
) -> Result<(FitOutput, bool), AppError> {
    let Some(cache_path) = &config.cache_path else {
        return Ok((fit_trajectory_model(&ingest.records, &config.model)?, false));
    };

    let key = cache::cache_key(csv_bytes, &config.model)?;

    if !config.refit {
        if let Some(fit) = cache::load(cache_path, key) {
            return Ok((fit, true));
        }
    }

    let fit = fit_trajectory_model(&ingest.records, &config.model)?;
    cache::store(cache_path, key, &fit)?;
    Ok((fit, false))
}
