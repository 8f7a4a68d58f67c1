//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::domain::{
    BreakpointAnalysis, FitOutput, PerAgeEstimate,
};
use crate::io::ingest::IngestedData;

/// Format the full run summary (dataset stats + model summary + diagnostics).
pub fn format_run_summary(ingest: &IngestedData, fit: &FitOutput) -> String {
    let mut out = String::new();
    let stats = &ingest.stats;

    out.push_str("=== clutch - Age Trajectory of Clutch Size ===\n");
    out.push_str(&format!(
        "Rows: read={} used={} eligible={} | females={} years={}\n",
        ingest.rows_read, ingest.rows_used, stats.n_eligible, stats.n_females, stats.n_years
    ));
    out.push_str(&format!(
        "Ages: [{}, {}] | mean clutch={:.2}\n",
        stats.age_min, stats.age_max, stats.clutch_mean
    ));
    if !ingest.row_errors.is_empty() {
        out.push_str(&format!(
            "Skipped {} invalid row(s); first at line {}: {}\n",
            ingest.row_errors.len(),
            ingest.row_errors[0].line,
            ingest.row_errors[0].message
        ));
    }

    let model = &fit.model;
    out.push_str("\nModel:\n");
    out.push_str(&format!(
        "- n={} | dispersion={:.3} | total EDF={:.2} | PIRLS iters={}\n",
        model.n_obs, model.dispersion, model.edf_total, model.pirls_iterations
    ));
    for s in &model.smooths {
        out.push_str(&format!(
            "- {:<16} k'={:<2} edf={:.2} lambda={:.4}\n",
            s.term.display_name(),
            s.k_prime,
            s.edf,
            s.lambda
        ));
    }
    out.push_str(&format!(
        "- {:<16} coef={:.4} se={:.4}\n",
        "lifespan", model.lifespan_coef, model.lifespan_se
    ));

    out.push_str("\nVariance components:\n");
    let mut components = model.variance_components.clone();
    components.sort_by(|a, b| b.sd.partial_cmp(&a.sd).unwrap_or(std::cmp::Ordering::Equal));
    for vc in &components {
        out.push_str(&format!(
            "- {:<16} sd={:.4} ({} levels)\n",
            vc.term.display_name(),
            vc.sd,
            vc.levels
        ));
    }

    out.push_str("\nBasis checks:\n");
    for check in &fit.diagnostics.basis {
        let note = if check.at_ceiling {
            " (at domain ceiling; expected)"
        } else if check.flagged {
            " (basis may be too small)"
        } else {
            ""
        };
        out.push_str(&format!(
            "- {:<16} k'={:<2} edf={:.2} k-index={:.3}{note}\n",
            check.term.display_name(),
            check.k_prime,
            check.edf,
            check.k_index
        ));
    }
    for c in &fit.diagnostics.concurvity {
        out.push_str(&format!(
            "- {:<16} concurvity={:.3}\n",
            c.term.display_name(),
            c.value
        ));
    }

    out
}

/// Format the per-age estimate table.
pub fn format_age_table(estimates: &[PerAgeEstimate]) -> String {
    let mut out = String::new();
    out.push_str("\nPer-age estimates (standardized, x10):\n");
    out.push_str(&format!(
        "{:>4}  {:>10}  {:>10}  {:>10}\n",
        "age", "effect", "se", "scaled"
    ));
    for e in estimates {
        out.push_str(&format!(
            "{:>4.0}  {:>10.4}  {:>10.4}  {:>10.4}\n",
            e.age, e.effect, e.se, e.scaled
        ));
    }
    out
}

/// Format the breakpoint analysis.
pub fn format_breakpoint(analysis: &BreakpointAnalysis, alpha: f64) -> String {
    let mut out = String::new();

    out.push_str("\nTrajectory shape:\n");
    out.push_str(&format!(
        "- linear trend: slope={:.4} se={:.4} p={:.4}\n",
        analysis.linear.slope, analysis.linear.se, analysis.linear.p_value
    ));
    out.push_str(&format!(
        "- discontinuity test: max stat={:.3} at age {:.0} over {} candidates, p<={:.4}\n",
        analysis.davies.statistic,
        analysis.davies.best_candidate,
        analysis.davies.n_candidates,
        analysis.davies.p_value
    ));

    match &analysis.segmented {
        Some(seg) => {
            out.push_str(&format!(
                "- breakpoint at age {:.2} ({} iterations)\n",
                seg.breakpoint, seg.iterations
            ));
            out.push_str(&format!(
                "  slope before: {:.4} se={:.4} p={:.4}\n",
                seg.slope_before, seg.slope_before_se, seg.slope_before_p
            ));
            out.push_str(&format!(
                "  slope after : {:.4} se={:.4} p={:.4}\n",
                seg.slope_after, seg.slope_after_se, seg.slope_after_p
            ));
        }
        None if analysis.gated_out => {
            out.push_str(&format!(
                "- no breakpoint: discontinuity test non-significant at alpha={alpha}; \
                 a single linear trend describes the trajectory\n"
            ));
        }
        None => {
            out.push_str("- no breakpoint fitted\n");
        }
    }

    out
}
