//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - runs the ingest/fit/extraction/breakpoint pipeline
//! - prints reports
//! - writes optional exports

use clap::Parser;

use crate::cli::{Command, FitArgs, SampleArgs};
use crate::domain::{BreakpointConfig, FitConfig, ModelConfig};
use crate::error::AppError;
use crate::io::export::{self, RunExport};

pub mod pipeline;

/// Entry point for the `clutch` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args, OutputMode::Full),
        Command::Ages(args) => handle_fit(args, OutputMode::AgesOnly),
        Command::Sample(args) => handle_sample(args),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Full,
    AgesOnly,
}

fn handle_fit(args: FitArgs, mode: OutputMode) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let run = pipeline::run_analysis(&config)?;

    match mode {
        OutputMode::Full => {
            if run.from_cache {
                println!("(model loaded from cache)");
            }
            println!("{}", crate::report::format_run_summary(&run.ingest, &run.fit));
            println!("{}", crate::report::format_age_table(&run.estimates));
            println!(
                "{}",
                crate::report::format_breakpoint(&run.breakpoint, config.breakpoint.alpha)
            );
        }
        OutputMode::AgesOnly => {
            println!("{}", crate::report::format_age_table(&run.estimates));
        }
    }

    if let Some(path) = &config.export_ages {
        export::write_ages_csv(path, &run.estimates)?;
    }
    if let Some(path) = &config.export_json {
        export::write_run_json(
            path,
            &RunExport {
                model: &run.fit.model,
                diagnostics: &run.fit.diagnostics,
                per_age: &run.estimates,
                breakpoint: Some(&run.breakpoint),
            },
        )?;
    }

    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let config = crate::data::sample::SampleConfig {
        females: args.females,
        seed: args.seed,
        shape: args.shape,
        noise_sd: args.noise_sd,
        start_year: args.start_year,
        years: args.years,
        max_age: args.max_age,
        ..crate::data::sample::SampleConfig::default()
    };

    let rows = crate::data::sample::generate_population(&config)?;
    crate::data::sample::write_sample_csv(&args.out, &rows)?;

    println!(
        "Wrote {} rows ({} females) to '{}'.",
        rows.len(),
        args.females,
        args.out.display()
    );
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        csv_path: args.csv.clone(),
        model: ModelConfig {
            k_age: args.k_age,
            k_date: args.k_date,
            lambda_min: args.lambda_min,
            lambda_max: args.lambda_max,
            lambda_steps_smooth: args.lambda_steps_smooth,
            lambda_steps_ranef: args.lambda_steps_ranef,
            max_pirls_iter: args.max_pirls_iter,
            pirls_tol: args.pirls_tol,
        },
        breakpoint: BreakpointConfig {
            gate: args.gate,
            alpha: args.alpha,
            restarts: args.restarts,
            seed: args.seed,
            ..BreakpointConfig::default()
        },
        export_ages: args.export_ages.clone(),
        export_json: args.export_json.clone(),
        cache_path: args.cache.clone(),
        refit: args.refit,
    }
}
