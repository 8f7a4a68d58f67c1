//! Per-age estimate extraction.
//!
//! From the fitted model's per-observation quantities we derive one
//! standardized, uncertainty-weighted estimate per age class:
//!
//! 1. group partial age effects (and their SEs) by distinct age and average
//!    within each class — a simplifying approximation that assumes
//!    within-class homogeneity of the estimate;
//! 2. standardize each per-age mean by centering on the across-age mean and
//!    dividing by the range of the full linear predictor;
//! 3. multiply by a fixed readability constant. The constant carries no
//!    statistical meaning but must be applied consistently when comparing
//!    across analyses.

use std::collections::BTreeMap;

use crate::domain::{PerAgeEstimate, PerObsEffects};
use crate::error::AppError;

/// Fixed readability scale applied after standardization.
pub const ESTIMATE_SCALE: f64 = 10.0;

pub fn per_age_estimates(per_obs: &PerObsEffects) -> Result<Vec<PerAgeEstimate>, AppError> {
    let n = per_obs.age.len();
    if n == 0 {
        return Err(AppError::insufficient_data(
            "Per-age extraction: no eligible observations.",
        ));
    }
    if per_obs.age_effect.len() != n || per_obs.age_se.len() != n || per_obs.eta.len() != n {
        return Err(AppError::internal(
            "Per-age extraction: per-observation vectors are misaligned.",
        ));
    }

    // Ages are integer-valued; key on the rounded value so grouping is exact.
    let mut groups: BTreeMap<i64, (f64, f64, usize)> = BTreeMap::new();
    for i in 0..n {
        let key = per_obs.age[i].round() as i64;
        let entry = groups.entry(key).or_insert((0.0, 0.0, 0));
        entry.0 += per_obs.age_effect[i];
        entry.1 += per_obs.age_se[i];
        entry.2 += 1;
    }

    let mut eta_min = f64::INFINITY;
    let mut eta_max = f64::NEG_INFINITY;
    for &e in &per_obs.eta {
        eta_min = eta_min.min(e);
        eta_max = eta_max.max(e);
    }
    let eta_range = eta_max - eta_min;
    if !(eta_range.is_finite() && eta_range > 0.0) {
        return Err(AppError::insufficient_data(
            "Per-age extraction: the linear predictor has no variation to standardize against.",
        ));
    }

    let per_age: Vec<(f64, f64, f64)> = groups
        .iter()
        .map(|(&age, &(effect_sum, se_sum, count))| {
            let c = count as f64;
            (age as f64, effect_sum / c, se_sum / c)
        })
        .collect();

    let grand_mean =
        per_age.iter().map(|(_, x, _)| x).sum::<f64>() / per_age.len() as f64;

    Ok(per_age
        .into_iter()
        .map(|(age, effect, se)| PerAgeEstimate {
            age,
            effect,
            se,
            scaled: (effect - grand_mean) / eta_range * ESTIMATE_SCALE,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn per_obs(ages: &[f64], effects: &[f64], ses: &[f64], eta: &[f64]) -> PerObsEffects {
        PerObsEffects {
            age: ages.to_vec(),
            age_effect: effects.to_vec(),
            age_se: ses.to_vec(),
            eta: eta.to_vec(),
        }
    }

    #[test]
    fn groups_by_age_and_averages_within_class() {
        let obs = per_obs(
            &[1.0, 1.0, 2.0, 3.0, 3.0, 3.0],
            &[0.1, 0.3, 0.5, 0.8, 1.0, 1.2],
            &[0.02, 0.04, 0.05, 0.1, 0.1, 0.1],
            &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5],
        );
        let estimates = per_age_estimates(&obs).unwrap();
        assert_eq!(estimates.len(), 3);

        assert!((estimates[0].effect - 0.2).abs() < 1e-12);
        assert!((estimates[0].se - 0.03).abs() < 1e-12);
        assert!((estimates[2].effect - 1.0).abs() < 1e-12);
    }

    #[test]
    fn standardization_is_mean_zero_before_scaling() {
        let obs = per_obs(
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[0.3, 0.9, 1.4, 1.1, 0.2],
            &[0.1; 5],
            &[0.0, 0.4, 0.9, 1.3, 2.1],
        );
        let estimates = per_age_estimates(&obs).unwrap();

        // Unweighted mean of the centered values is exactly zero (the ×10
        // readability scale does not change this).
        let mean_scaled: f64 =
            estimates.iter().map(|e| e.scaled).sum::<f64>() / estimates.len() as f64;
        assert!(mean_scaled.abs() < 1e-12, "mean={mean_scaled}");
    }

    #[test]
    fn scaled_values_use_the_linear_predictor_range() {
        let obs = per_obs(
            &[1.0, 2.0],
            &[0.0, 1.0],
            &[0.1, 0.1],
            &[0.0, 2.0], // range 2
        );
        let estimates = per_age_estimates(&obs).unwrap();
        // Centered effects are ∓0.5; scaled = ∓0.5 / 2 × 10 = ∓2.5.
        assert!((estimates[0].scaled + 2.5).abs() < 1e-12);
        assert!((estimates[1].scaled - 2.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_linear_predictor_is_insufficient_data() {
        let obs = per_obs(&[1.0, 2.0], &[0.1, 0.2], &[0.1, 0.1], &[1.0, 1.0]);
        let err = per_age_estimates(&obs).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }
}
