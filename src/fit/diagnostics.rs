//! Read-only diagnostics over a fitted trajectory model.
//!
//! Three independent reports, none of which mutate the fit:
//!
//! - **Basis adequacy**: is a smooth term's basis dimension large enough for
//!   the curvature left in the residuals? The index compares neighboring
//!   (covariate-ordered) Pearson residual differences against the residual
//!   variance; white-noise residuals give ≈ 1, unmodeled structure pushes it
//!   below 1. A flag on a term whose basis is already at its domain ceiling
//!   (the age smooth capped by the distinct-age count) is expected and not
//!   actionable.
//! - **Concurvity**: the share of a smooth's fitted component that lies in
//!   the column space of the other terms, in [0, 1]. Values near 1 mean the
//!   effect cannot be attributed reliably.
//! - **Variance components** are reported on the model summary itself; see
//!   `fit::fitter`.

use nalgebra::DVector;

use crate::domain::{BasisCheck, ConcurvityEstimate, DiagnosticsReport, Term, TrajectoryModel};
use crate::math::solve_least_squares;
use crate::model::ModelDesign;

pub fn run_diagnostics(
    design: &ModelDesign,
    model: &TrajectoryModel,
    beta: &DVector<f64>,
    mu: &[f64],
    dispersion: f64,
) -> DiagnosticsReport {
    let residuals = pearson_residuals(design, mu, dispersion);

    let basis = model
        .smooths
        .iter()
        .map(|s| {
            let covariate = match s.term {
                Term::AgeSmooth => &design.ages,
                _ => &design.dates,
            };
            let k_index = neighborhood_index(covariate, &residuals);
            let at_ceiling = s.term == Term::AgeSmooth && design.k_age_at_ceiling;
            let flagged = s.edf > 0.9 * s.k_prime as f64 && k_index < 1.0;
            BasisCheck {
                term: s.term,
                k_prime: s.k_prime,
                edf: s.edf,
                k_index,
                flagged,
                at_ceiling,
            }
        })
        .collect();

    let concurvity = [Term::AgeSmooth, Term::DateSmooth]
        .iter()
        .map(|&term| ConcurvityEstimate {
            term,
            value: concurvity_estimate(design, beta, term),
        })
        .collect();

    DiagnosticsReport { basis, concurvity }
}

fn pearson_residuals(design: &ModelDesign, mu: &[f64], dispersion: f64) -> Vec<f64> {
    let scale = dispersion.max(1e-12).sqrt();
    design
        .y
        .iter()
        .zip(mu.iter())
        .map(|(&y, &m)| {
            let m = m.max(1e-8);
            (y - m) / (scale * m.sqrt())
        })
        .collect()
}

/// Ratio of the mean squared difference of covariate-ordered neighboring
/// residuals to twice the residual variance.
fn neighborhood_index(covariate: &[f64], residuals: &[f64]) -> f64 {
    let n = residuals.len();
    if n < 3 {
        return 1.0;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        covariate[a]
            .partial_cmp(&covariate[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mean = residuals.iter().sum::<f64>() / n as f64;
    let var = residuals.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n as f64 - 1.0);
    if var <= 1e-12 {
        return 1.0;
    }

    let mut diff_sq = 0.0;
    for w in order.windows(2) {
        let d = residuals[w[1]] - residuals[w[0]];
        diff_sq += d * d;
    }
    let mean_diff_sq = diff_sq / (n as f64 - 1.0);

    mean_diff_sq / (2.0 * var)
}

/// Project one smooth's fitted component onto the span of the other terms.
fn concurvity_estimate(design: &ModelDesign, beta: &DVector<f64>, term: Term) -> f64 {
    let range = design.term_map.columns(term);
    let x_term = design.x.columns(range.start, range.len()).into_owned();
    let beta_term = beta.rows(range.start, range.len()).into_owned();
    let component = &x_term * &beta_term;

    let total = component.norm_squared();
    if total <= 1e-12 {
        return 0.0;
    }

    let others = design.columns_excluding(term);
    let Some(coef) = solve_least_squares(&others, &component) else {
        return 1.0;
    };
    let projected = &others * &coef;

    (projected.norm_squared() / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighborhood_index_near_one_for_alternating_noise() {
        // Alternating residuals have no neighbor correlation structure that
        // the index should read as "too smooth".
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let r: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let idx = neighborhood_index(&x, &r);
        assert!(idx > 1.0, "idx={idx}");
    }

    #[test]
    fn neighborhood_index_low_for_smooth_residual_pattern() {
        // A slow sine leaves neighboring residuals nearly equal.
        let x: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let r: Vec<f64> = x.iter().map(|v| (v / 30.0).sin()).collect();
        let idx = neighborhood_index(&x, &r);
        assert!(idx < 0.5, "idx={idx}");
    }
}
