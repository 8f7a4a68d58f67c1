//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - cached and reloaded to skip the expensive model fit

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One breeding record: a single clutch laid by one female in one season.
///
/// `female_id` repeats across rows (females breed in multiple years) and
/// `year` groups rows that share a season; both are grouping keys, never
/// independent observations.
#[derive(Debug, Clone)]
pub struct ClutchRow {
    pub female_id: String,
    /// Integer age of the female at this clutch (years).
    pub age: u32,
    /// Number of eggs in the clutch.
    pub clutch_size: u32,
    /// Day-of-year the clutch was laid.
    pub julian_date: f64,
    /// Total lifespan of the female; missing while she is still alive.
    pub lifespan: Option<f64>,
    /// Breeding season.
    pub year: i32,
}

/// A record eligible for trajectory modeling (known lifespan).
#[derive(Debug, Clone)]
pub struct ClutchRecord {
    pub female_id: String,
    pub age: u32,
    pub clutch_size: u32,
    pub julian_date: f64,
    pub lifespan: f64,
    pub year: i32,
}

impl ClutchRow {
    /// Promote to an eligible modeling record if `lifespan` is known.
    pub fn to_record(&self) -> Option<ClutchRecord> {
        let lifespan = self.lifespan?;
        Some(ClutchRecord {
            female_id: self.female_id.clone(),
            age: self.age,
            clutch_size: self.clutch_size,
            julian_date: self.julian_date,
            lifespan,
            year: self.year,
        })
    }
}

/// Logical model terms, used as stable keys into the design matrix.
///
/// Extracted values are always addressed through this enum rather than
/// through string-derived column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    AgeSmooth,
    DateSmooth,
    Lifespan,
    FemaleIntercepts,
    YearIntercepts,
}

impl Term {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            Term::AgeSmooth => "s(age)",
            Term::DateSmooth => "s(julian_date)",
            Term::Lifespan => "lifespan",
            Term::FemaleIntercepts => "female (random)",
            Term::YearIntercepts => "year (random)",
        }
    }
}

/// Per-smooth summary of the fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothSummary {
    pub term: Term,
    /// Basis dimension minus the penalty null space (the flexibility bound).
    pub k_prime: usize,
    /// Effective degrees of freedom actually used.
    pub edf: f64,
    /// Selected smoothing parameter.
    pub lambda: f64,
}

/// Standard deviation attributable to one random-effect grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceComponent {
    pub term: Term,
    pub sd: f64,
    pub levels: usize,
}

/// Scalar summary of the fitted trajectory model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryModel {
    pub n_obs: usize,
    /// Quasi-Poisson dispersion (Pearson estimate).
    pub dispersion: f64,
    pub edf_total: f64,
    pub smooths: Vec<SmoothSummary>,
    pub variance_components: Vec<VarianceComponent>,
    /// Linear lifespan adjustment (selective-disappearance control).
    pub lifespan_coef: f64,
    pub lifespan_se: f64,
    pub pirls_iterations: usize,
}

/// Per-observation quantities derived from the fitted model, on the link scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerObsEffects {
    /// Age of each eligible observation (aligned with the vectors below).
    pub age: Vec<f64>,
    /// Partial contribution of the age smooth.
    pub age_effect: Vec<f64>,
    /// Standard error of the age partial effect.
    pub age_se: Vec<f64>,
    /// Full linear predictor (all terms combined).
    pub eta: Vec<f64>,
}

/// Basis-dimension adequacy check for one smooth term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasisCheck {
    pub term: Term,
    pub k_prime: usize,
    pub edf: f64,
    /// Neighborhood-difference index of covariate-ordered residuals;
    /// values well below 1 suggest unmodeled curvature.
    pub k_index: f64,
    pub flagged: bool,
    /// The basis is already at its domain-imposed ceiling (e.g. the number
    /// of distinct age classes), so a flag is expected and not actionable.
    pub at_ceiling: bool,
}

/// Concurvity estimate for one smooth term, in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurvityEstimate {
    pub term: Term,
    pub value: f64,
}

/// Read-only diagnostic reports over a fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub basis: Vec<BasisCheck>,
    pub concurvity: Vec<ConcurvityEstimate>,
}

/// Everything the fitting stage produces; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOutput {
    pub model: TrajectoryModel,
    pub per_obs: PerObsEffects,
    pub diagnostics: DiagnosticsReport,
}

/// One standardized, uncertainty-weighted estimate per age class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerAgeEstimate {
    pub age: f64,
    /// Mean partial age effect on the link scale.
    pub effect: f64,
    /// Mean standard error of the partial effect.
    pub se: f64,
    /// Standardized effect: centered, divided by the full linear-predictor
    /// range, and multiplied by the fixed readability scale (10).
    pub scaled: f64,
}

/// Single-slope weighted regression over the per-age estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearTrend {
    pub slope: f64,
    pub se: f64,
    pub p_value: f64,
}

/// Davies-type slope-discontinuity test result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaviesTest {
    /// Maximum hinge-term statistic over the candidate breakpoints.
    pub statistic: f64,
    /// Candidate age at which the maximum occurred.
    pub best_candidate: f64,
    pub p_value: f64,
    pub n_candidates: usize,
}

/// Two-slope, continuous-at-breakpoint regression result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentedFit {
    /// Estimated breakpoint age (continuous-valued, strictly inside the
    /// observed age range).
    pub breakpoint: f64,
    /// Slope before the breakpoint (early-life improvement if positive).
    pub slope_before: f64,
    pub slope_before_se: f64,
    pub slope_before_p: f64,
    /// Slope after the breakpoint (senescent decline if negative).
    pub slope_after: f64,
    pub slope_after_se: f64,
    pub slope_after_p: f64,
    pub weighted_sse: f64,
    pub iterations: usize,
}

/// Terminal artifact of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointAnalysis {
    pub linear: LinearTrend,
    pub davies: DaviesTest,
    /// `None` when the discontinuity test is non-significant and the gate
    /// is active: the correct conclusion is then a single linear trend.
    pub segmented: Option<SegmentedFit>,
    /// True when a segmented fit was suppressed by the significance gate.
    pub gated_out: bool,
}

/// Whether to gate the segmented fit on the Davies test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointGate {
    /// Only fit/report a breakpoint when the discontinuity test is
    /// significant at `alpha`.
    Gated,
    /// Always run the segmented fit (the legacy workflow behavior).
    Always,
}

impl std::fmt::Display for BreakpointGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakpointGate::Gated => write!(f, "gated"),
            BreakpointGate::Always => write!(f, "always"),
        }
    }
}

/// Shape of the synthetic age trajectory for sample generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryShape {
    /// Early-life rise to a peak at age 4, then decline.
    Peaked,
    /// Exactly linear in age.
    Linear,
}

impl std::fmt::Display for TrajectoryShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrajectoryShape::Peaked => write!(f, "peaked"),
            TrajectoryShape::Linear => write!(f, "linear"),
        }
    }
}

/// Trajectory-model settings; part of the cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum basis dimension for the age smooth; 0 means "auto", i.e.
    /// one less than the number of distinct age classes.
    pub k_age: usize,
    /// Basis dimension for the laying-date smooth.
    pub k_date: usize,
    /// Smoothing-parameter grid bounds (log-spaced).
    pub lambda_min: f64,
    pub lambda_max: f64,
    /// Grid steps per smooth term.
    pub lambda_steps_smooth: usize,
    /// Grid steps per random-effect term.
    pub lambda_steps_ranef: usize,
    pub max_pirls_iter: usize,
    pub pirls_tol: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            k_age: 0,
            k_date: 8,
            lambda_min: 1e-3,
            lambda_max: 1e3,
            lambda_steps_smooth: 5,
            lambda_steps_ranef: 3,
            max_pirls_iter: 50,
            pirls_tol: 1e-8,
        }
    }
}

/// Breakpoint-analysis settings.
#[derive(Debug, Clone)]
pub struct BreakpointConfig {
    pub gate: BreakpointGate,
    /// Significance level for the discontinuity gate.
    pub alpha: f64,
    /// Number of bootstrap-restart attempts for the breakpoint search.
    pub restarts: usize,
    pub seed: u64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            gate: BreakpointGate::Gated,
            alpha: 0.05,
            restarts: 10,
            seed: 42,
            max_iter: 30,
            tol: 1e-6,
        }
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub csv_path: PathBuf,
    pub model: ModelConfig,
    pub breakpoint: BreakpointConfig,

    pub export_ages: Option<PathBuf>,
    pub export_json: Option<PathBuf>,

    /// Optional fitted-model cache file.
    pub cache_path: Option<PathBuf>,
    /// Ignore any cached model and refit (explicit cache invalidation).
    pub refit: bool,
}
