//! Breakpoint analysis over the per-age estimates.
//!
//! Stages:
//!
//! 1. weighted linear regression of the standardized estimate on age, with
//!    weight `1/se` per age class (noisier classes, typically the oldest
//!    ages, are down-weighted);
//! 2. a Davies-type slope-discontinuity test: the maximum hinge-term
//!    statistic over the interior integer ages, with the Davies (1987)
//!    upper bound for the adjusted p-value;
//! 3. if a two-segment model is justified (or the gate is overridden), a
//!    segmented fit via the Muggeo linearization, restarted from
//!    bootstrap-perturbed initial breakpoints, keeping the restart with the
//!    lowest weighted SSE.
//!
//! When the discontinuity test is non-significant the correct conclusion is
//! a single linear trend; under the default gate no breakpoint is fitted or
//! reported.

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{
    BreakpointAnalysis, BreakpointConfig, BreakpointGate, DaviesTest, LinearTrend, PerAgeEstimate,
    SegmentedFit,
};
use crate::error::AppError;
use crate::math::{penalized_wls_full, two_sided_p};

/// Fewest age classes for a meaningful discontinuity test and segmented fit.
const MIN_AGES: usize = 5;

/// Breakpoints are kept this fraction of the age range away from either end.
const EDGE_MARGIN: f64 = 0.05;

struct WlsFit {
    beta: DVector<f64>,
    cov: DMatrix<f64>,
    weighted_rss: f64,
}

pub fn analyze_breakpoint(
    estimates: &[PerAgeEstimate],
    config: &BreakpointConfig,
) -> Result<BreakpointAnalysis, AppError> {
    if estimates.len() < MIN_AGES {
        return Err(AppError::insufficient_data(format!(
            "Breakpoint analysis needs at least {MIN_AGES} age classes, got {}.",
            estimates.len()
        )));
    }

    let mut sorted = estimates.to_vec();
    sorted.sort_by(|a, b| a.age.partial_cmp(&b.age).unwrap_or(std::cmp::Ordering::Equal));

    let ages: Vec<f64> = sorted.iter().map(|e| e.age).collect();
    let values: Vec<f64> = sorted.iter().map(|e| e.scaled).collect();
    let weights = estimate_weights(&sorted)?;

    let linear = linear_trend(&ages, &values, &weights)?;
    let davies = davies_test(&ages, &values, &weights)?;

    let significant = davies.p_value < config.alpha;
    let run_segmented = significant || config.gate == BreakpointGate::Always;

    let segmented = if run_segmented {
        match segmented_search(&ages, &values, &weights, &davies, config) {
            Ok(seg) => Some(seg),
            // A forced fit on data without a detectable discontinuity may
            // legitimately fail to localize a breakpoint.
            Err(_) if !significant => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    Ok(BreakpointAnalysis {
        linear,
        davies,
        segmented,
        gated_out: !significant && config.gate == BreakpointGate::Gated,
    })
}

/// Per-class regression weights `1/se`.
///
/// An SE of zero would make a weight infinite and the class would dominate
/// the fit exactly; that is an estimation failure, not a precise class.
fn estimate_weights(estimates: &[PerAgeEstimate]) -> Result<Vec<f64>, AppError> {
    let mut weights = Vec::with_capacity(estimates.len());
    for e in estimates {
        if !(e.se.is_finite() && e.se > 0.0) {
            return Err(AppError::insufficient_data(format!(
                "Breakpoint analysis: age class {} has a degenerate standard error ({}); \
                 too few observations to estimate.",
                e.age, e.se
            )));
        }
        weights.push(1.0 / e.se);
    }
    Ok(weights)
}

fn wls(x: &DMatrix<f64>, y: &[f64], w: &[f64]) -> Option<WlsFit> {
    let yv = DVector::from_column_slice(y);
    let full = penalized_wls_full(x, &yv, w, &[])?;

    let fitted = x * &full.beta;
    let mut rss = 0.0;
    for i in 0..y.len() {
        let r = y[i] - fitted[i];
        rss += w[i] * r * r;
    }

    Some(WlsFit {
        beta: full.beta,
        cov: full.cov_unscaled,
        weighted_rss: rss,
    })
}

fn linear_trend(ages: &[f64], values: &[f64], weights: &[f64]) -> Result<LinearTrend, AppError> {
    let n = ages.len();
    let mut x = DMatrix::<f64>::zeros(n, 2);
    for i in 0..n {
        x[(i, 0)] = 1.0;
        x[(i, 1)] = ages[i];
    }

    let fit = wls(&x, values, weights).ok_or_else(|| {
        AppError::internal("Breakpoint analysis: single-slope regression is singular.")
    })?;

    let sigma2 = fit.weighted_rss / (n as f64 - 2.0).max(1.0);
    let se = (sigma2 * fit.cov[(1, 1)]).max(0.0).sqrt();
    let p_value = slope_p(fit.beta[1], se);

    Ok(LinearTrend {
        slope: fit.beta[1],
        se,
        p_value,
    })
}

/// Hinge-term statistic at each interior integer age, with the Davies bound
/// over the whole candidate set. Deterministic for fixed input.
fn davies_test(ages: &[f64], values: &[f64], weights: &[f64]) -> Result<DaviesTest, AppError> {
    let n = ages.len();
    // Interior ages only: (distinct ages − 2) candidates.
    let candidates = &ages[1..n - 1];

    let mut stats = Vec::with_capacity(candidates.len());
    let mut best = (0.0f64, candidates[0]);

    for &psi in candidates {
        let mut x = DMatrix::<f64>::zeros(n, 3);
        for i in 0..n {
            x[(i, 0)] = 1.0;
            x[(i, 1)] = ages[i];
            x[(i, 2)] = (ages[i] - psi).max(0.0);
        }

        let fit = wls(&x, values, weights).ok_or_else(|| {
            AppError::internal(format!(
                "Breakpoint analysis: hinge regression singular at candidate age {psi}."
            ))
        })?;

        let sigma2 = (fit.weighted_rss / (n as f64 - 3.0).max(1.0)).max(0.0);
        let se_gamma = (sigma2 * fit.cov[(2, 2)]).max(0.0).sqrt();
        let gamma = fit.beta[2];

        // Exact-fit guard: a zero residual scale with a zero hinge
        // coefficient is "no discontinuity", not an infinite statistic.
        let stat = if se_gamma < 1e-12 {
            if gamma.abs() < 1e-9 { 0.0 } else { 1e6 }
        } else {
            (gamma / se_gamma).abs()
        };

        if stat > best.0 {
            best = (stat, psi);
        }
        stats.push(stat);
    }

    Ok(DaviesTest {
        statistic: best.0,
        best_candidate: best.1,
        p_value: davies_p_bound(&stats),
        n_candidates: stats.len(),
    })
}

/// Davies (1987) upper bound for the supremum of a Gaussian process over the
/// candidate set: `p ≤ 2Φ(−M) + V·exp(−M²/2)/√(8π)` where `V` is the total
/// variation of the statistic sequence.
fn davies_p_bound(stats: &[f64]) -> f64 {
    let m = stats.iter().fold(0.0f64, |acc, &s| acc.max(s));
    let v: f64 = stats.windows(2).map(|w| (w[1] - w[0]).abs()).sum();

    let base = 2.0 * crate::math::normal_cdf(-m);
    let correction = v * (-0.5 * m * m).exp() / (8.0 * std::f64::consts::PI).sqrt();
    (base + correction).clamp(0.0, 1.0)
}

/// Muggeo linearization with bootstrap restarts.
fn segmented_search(
    ages: &[f64],
    values: &[f64],
    weights: &[f64],
    davies: &DaviesTest,
    config: &BreakpointConfig,
) -> Result<SegmentedFit, AppError> {
    let age_min = ages[0];
    let age_max = ages[ages.len() - 1];
    let range = age_max - age_min;
    let lo = age_min + EDGE_MARGIN * range;
    let hi = age_max - EDGE_MARGIN * range;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let jitter = Normal::new(0.0, range / 4.0)
        .map_err(|e| AppError::internal(format!("Breakpoint restart distribution: {e}")))?;

    let mut best: Option<SegmentedFit> = None;

    for restart in 0..=config.restarts {
        let psi0 = if restart == 0 {
            davies.best_candidate
        } else {
            (davies.best_candidate + jitter.sample(&mut rng)).clamp(lo, hi)
        };

        let Some(candidate) = muggeo_iterate(ages, values, weights, psi0, lo, hi, config) else {
            continue;
        };

        let better = match &best {
            None => true,
            Some(b) => candidate.weighted_sse < b.weighted_sse,
        };
        if better {
            best = Some(candidate);
        }
    }

    best.ok_or_else(|| {
        AppError::convergence(
            "Breakpoint analysis: the segmented search did not converge from any restart.",
        )
    })
}

fn muggeo_iterate(
    ages: &[f64],
    values: &[f64],
    weights: &[f64],
    psi0: f64,
    lo: f64,
    hi: f64,
    config: &BreakpointConfig,
) -> Option<SegmentedFit> {
    let n = ages.len();
    let mut psi = psi0.clamp(lo, hi);
    let mut best: Option<SegmentedFit> = None;

    // With few integer-spaced age classes the hinge design is piecewise
    // constant in ψ between adjacent observed ages, so the linearized
    // update need not contract: it can cycle between two neighbors of the
    // true breakpoint forever. The estimate is therefore the best-scoring
    // ψ visited, not the last iterate; the step criterion only decides
    // when to stop looking.
    for iter in 1..=config.max_iter {
        if let Some(fit) = two_slope_fit(ages, values, weights, psi, iter) {
            let better = best
                .as_ref()
                .is_none_or(|b| fit.weighted_sse < b.weighted_sse);
            if better {
                best = Some(fit);
            }
        }

        // Working model: value ~ 1 + age + (age−ψ)+ + gap indicator.
        let mut x = DMatrix::<f64>::zeros(n, 4);
        for i in 0..n {
            x[(i, 0)] = 1.0;
            x[(i, 1)] = ages[i];
            x[(i, 2)] = (ages[i] - psi).max(0.0);
            x[(i, 3)] = if ages[i] > psi { -1.0 } else { 0.0 };
        }

        let Some(fit) = wls(&x, values, weights) else {
            break;
        };
        let gamma = fit.beta[2];
        let gap = fit.beta[3];
        if gamma.abs() < 1e-10 {
            break;
        }

        let psi_new = (psi + gap / gamma).clamp(lo, hi);
        let moved = (psi_new - psi).abs();
        psi = psi_new;

        if moved < config.tol {
            if let Some(fit) = two_slope_fit(ages, values, weights, psi, iter) {
                let better = best
                    .as_ref()
                    .is_none_or(|b| fit.weighted_sse < b.weighted_sse);
                if better {
                    best = Some(fit);
                }
            }
            break;
        }
    }

    best
}

/// Two-slope, continuous-at-breakpoint fit at a fixed ψ.
fn two_slope_fit(
    ages: &[f64],
    values: &[f64],
    weights: &[f64],
    psi: f64,
    iterations: usize,
) -> Option<SegmentedFit> {
    let n = ages.len();
    let mut x = DMatrix::<f64>::zeros(n, 3);
    for i in 0..n {
        x[(i, 0)] = 1.0;
        x[(i, 1)] = ages[i];
        x[(i, 2)] = (ages[i] - psi).max(0.0);
    }
    let fit = wls(&x, values, weights)?;

    let sigma2 = (fit.weighted_rss / (n as f64 - 3.0).max(1.0)).max(0.0);
    let slope_before = fit.beta[1];
    let gamma = fit.beta[2];
    let slope_after = slope_before + gamma;

    let var_before = sigma2 * fit.cov[(1, 1)];
    let var_after = sigma2 * (fit.cov[(1, 1)] + fit.cov[(2, 2)] + 2.0 * fit.cov[(1, 2)]);
    let slope_before_se = var_before.max(0.0).sqrt();
    let slope_after_se = var_after.max(0.0).sqrt();

    Some(SegmentedFit {
        breakpoint: psi,
        slope_before,
        slope_before_se,
        slope_before_p: slope_p(slope_before, slope_before_se),
        slope_after,
        slope_after_se,
        slope_after_p: slope_p(slope_after, slope_after_se),
        weighted_sse: fit.weighted_rss,
        iterations,
    })
}

fn slope_p(slope: f64, se: f64) -> f64 {
    if se < 1e-12 {
        if slope.abs() < 1e-9 { 1.0 } else { 0.0 }
    } else {
        two_sided_p(slope / se)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(age: f64, scaled: f64, se: f64) -> PerAgeEstimate {
        PerAgeEstimate {
            age,
            effect: scaled,
            se,
            scaled,
        }
    }

    /// Rise to a peak at age 4, then decline, with small deterministic noise.
    fn peaked_estimates() -> Vec<PerAgeEstimate> {
        (1..=9)
            .map(|a| {
                let age = f64::from(a);
                let signal = if age <= 4.0 {
                    0.8 * age
                } else {
                    3.2 - 0.5 * (age - 4.0)
                };
                let noise = if a % 2 == 0 { 0.015 } else { -0.015 };
                estimate(age, signal + noise, 0.08 + 0.01 * age)
            })
            .collect()
    }

    fn linear_estimates() -> Vec<PerAgeEstimate> {
        (1..=9)
            .map(|a| estimate(f64::from(a), 0.4 * f64::from(a), 0.1))
            .collect()
    }

    #[test]
    fn zero_se_is_insufficient_data() {
        let mut estimates = linear_estimates();
        estimates[3].se = 0.0;
        let err = analyze_breakpoint(&estimates, &BreakpointConfig::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }

    #[test]
    fn weights_are_finite_and_positive_for_positive_ses() {
        let estimates = peaked_estimates();
        let weights = estimate_weights(&estimates).unwrap();
        assert!(weights.iter().all(|w| w.is_finite() && *w > 0.0));
    }

    #[test]
    fn exactly_linear_trend_reports_no_breakpoint() {
        let analysis =
            analyze_breakpoint(&linear_estimates(), &BreakpointConfig::default()).unwrap();

        assert!(
            analysis.davies.p_value > 0.05,
            "p={}",
            analysis.davies.p_value
        );
        assert!(analysis.segmented.is_none());
        assert!(analysis.gated_out);
        assert!(analysis.linear.slope > 0.0);
    }

    #[test]
    fn peaked_trajectory_recovers_breakpoint_near_four() {
        let analysis =
            analyze_breakpoint(&peaked_estimates(), &BreakpointConfig::default()).unwrap();

        assert!(
            analysis.davies.p_value < 0.05,
            "davies p={}",
            analysis.davies.p_value
        );
        let seg = analysis.segmented.expect("segmented fit expected");

        assert!(
            (seg.breakpoint - 4.0).abs() <= 1.0,
            "breakpoint={}",
            seg.breakpoint
        );
        assert!(seg.slope_before > 0.0 && seg.slope_before_p < 0.05);
        assert!(seg.slope_after < 0.0 && seg.slope_after_p < 0.05);
        assert!(seg.breakpoint > 1.0 && seg.breakpoint < 9.0);
    }

    #[test]
    fn cycling_update_still_localizes_the_breakpoint() {
        // Integer age classes leave the hinge design unchanged between
        // adjacent ages, so the linearized update oscillates around the
        // true corner instead of contracting below the step tolerance.
        // A single start with no restarts must still return the
        // best-scoring breakpoint visited.
        let config = BreakpointConfig {
            restarts: 0,
            ..BreakpointConfig::default()
        };
        let analysis = analyze_breakpoint(&peaked_estimates(), &config).unwrap();
        let seg = analysis.segmented.expect("segmented fit expected");
        assert!(
            (seg.breakpoint - 4.0).abs() <= 1.0,
            "breakpoint={}",
            seg.breakpoint
        );
        assert!(seg.weighted_sse.is_finite());
    }

    #[test]
    fn davies_test_is_deterministic() {
        let estimates = peaked_estimates();
        let a = analyze_breakpoint(&estimates, &BreakpointConfig::default()).unwrap();
        let b = analyze_breakpoint(&estimates, &BreakpointConfig::default()).unwrap();
        assert_eq!(a.davies.p_value.to_bits(), b.davies.p_value.to_bits());
        assert_eq!(a.davies.statistic.to_bits(), b.davies.statistic.to_bits());
    }

    #[test]
    fn candidate_count_is_interior_ages() {
        let analysis =
            analyze_breakpoint(&peaked_estimates(), &BreakpointConfig::default()).unwrap();
        assert_eq!(analysis.davies.n_candidates, 9 - 2);
    }

    #[test]
    fn gate_override_fits_segmented_on_linear_data() {
        let config = BreakpointConfig {
            gate: BreakpointGate::Always,
            ..BreakpointConfig::default()
        };
        let analysis = analyze_breakpoint(&linear_estimates(), &config).unwrap();
        assert!(!analysis.gated_out);
        // The search may legitimately fail to localize a breakpoint in
        // perfectly linear data, but when it reports one it must stay
        // strictly inside the observed range.
        if let Some(seg) = analysis.segmented {
            assert!(seg.breakpoint > 1.0 && seg.breakpoint < 9.0);
        }
    }
}
