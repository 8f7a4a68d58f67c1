//! Command-line parsing for the clutch-size trajectory fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{BreakpointGate, TrajectoryShape};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "clutch",
    version,
    about = "Age trajectory of clutch size: additive mixed model + breakpoint analysis"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the trajectory model, print the full summary, and run the
    /// breakpoint analysis.
    Fit(FitArgs),
    /// Print the per-age estimate table only (useful for scripting).
    Ages(FitArgs),
    /// Generate a synthetic breeding population CSV.
    Sample(SampleArgs),
}

/// Common options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Breeding-record CSV (female_id, age, clutch_size, julian_date,
    /// lifespan, year).
    pub csv: PathBuf,

    /// Basis dimension for the age smooth (0 = auto: one less than the
    /// number of distinct age classes).
    #[arg(long, default_value_t = 0)]
    pub k_age: usize,

    /// Basis dimension for the laying-date smooth.
    #[arg(long, default_value_t = 8)]
    pub k_date: usize,

    /// Minimum smoothing parameter for the grid search.
    #[arg(long, default_value_t = 1e-3)]
    pub lambda_min: f64,

    /// Maximum smoothing parameter for the grid search.
    #[arg(long, default_value_t = 1e3)]
    pub lambda_max: f64,

    /// Grid steps per smooth term.
    #[arg(long, default_value_t = 5)]
    pub lambda_steps_smooth: usize,

    /// Grid steps per random-effect term.
    #[arg(long, default_value_t = 3)]
    pub lambda_steps_ranef: usize,

    /// Maximum PIRLS iterations per candidate.
    #[arg(long, default_value_t = 50)]
    pub max_pirls_iter: usize,

    /// PIRLS convergence tolerance.
    #[arg(long, default_value_t = 1e-8)]
    pub pirls_tol: f64,

    /// Whether the segmented fit is gated on the discontinuity test.
    #[arg(long, value_enum, default_value_t = BreakpointGate::Gated)]
    pub gate: BreakpointGate,

    /// Significance level for the discontinuity gate.
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    /// Bootstrap restarts for the breakpoint search.
    #[arg(long, default_value_t = 10)]
    pub restarts: usize,

    /// Random seed for the breakpoint restarts.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Export per-age estimates to CSV.
    #[arg(long = "export-ages")]
    pub export_ages: Option<PathBuf>,

    /// Export the full run result to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,

    /// Cache the fitted model at this path (reused when data and settings
    /// are unchanged).
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Ignore any cached model and refit.
    #[arg(long)]
    pub refit: bool,
}

/// Options for synthetic population generation.
#[derive(Debug, Parser)]
pub struct SampleArgs {
    /// Output CSV path.
    pub out: PathBuf,

    /// Number of females in the population.
    #[arg(short = 'n', long, default_value_t = 80)]
    pub females: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Shape of the true age trajectory.
    #[arg(long, value_enum, default_value_t = TrajectoryShape::Peaked)]
    pub shape: TrajectoryShape,

    /// Residual noise SD on the link scale.
    #[arg(long, default_value_t = 0.05)]
    pub noise_sd: f64,

    /// First breeding season of the earliest cohort.
    #[arg(long, default_value_t = 2000)]
    pub start_year: i32,

    /// Number of cohort entry years.
    #[arg(long, default_value_t = 12)]
    pub years: usize,

    /// Maximum attainable age.
    #[arg(long, default_value_t = 9)]
    pub max_age: u32,
}
