//! Smoothing-parameter grid generation.
//!
//! Smoothing parameters are selected by a deterministic grid search over
//! log-spaced λ values, one dimension per penalized block.
//!
//! Why grid search?
//! - It avoids the local-minima issues of nonlinear λ optimization.
//! - It is deterministic given the same inputs/flags.
//! - With four penalty dimensions and a coarse grid, the candidate count
//!   stays small enough to evaluate in parallel.

use crate::domain::ModelConfig;
use crate::error::AppError;
use crate::model::Lambdas;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(AppError::data_format(format!(
            "Invalid lambda range: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(AppError::data_format("Lambda steps must be >= 2."));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Cartesian grid over (age, date, female, year) smoothing parameters.
///
/// The smooth terms share one set of grid values, the random-effect ridges
/// another (usually coarser) set.
pub fn lambda_grid(config: &ModelConfig) -> Result<Vec<Lambdas>, AppError> {
    let smooth = log_space(config.lambda_min, config.lambda_max, config.lambda_steps_smooth)?;
    let ranef = log_space(config.lambda_min, config.lambda_max, config.lambda_steps_ranef)?;

    let mut out = Vec::with_capacity(smooth.len() * smooth.len() * ranef.len() * ranef.len());
    for &age in &smooth {
        for &date in &smooth {
            for &female in &ranef {
                for &year in &ranef {
                    out.push(Lambdas {
                        age,
                        date,
                        female,
                        year,
                    });
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_endpoints_and_monotonicity() {
        let values = log_space(0.01, 100.0, 5).unwrap();
        assert_eq!(values.len(), 5);
        assert!((values[0] - 0.01).abs() < 1e-12);
        assert!((values[4] - 100.0).abs() < 1e-9);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn grid_size_is_cartesian() {
        let config = ModelConfig {
            lambda_steps_smooth: 3,
            lambda_steps_ranef: 2,
            ..ModelConfig::default()
        };
        let grid = lambda_grid(&config).unwrap();
        assert_eq!(grid.len(), 3 * 3 * 2 * 2);
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!(log_space(-1.0, 10.0, 3).is_err());
        assert!(log_space(10.0, 1.0, 3).is_err());
        assert!(log_space(1.0, 10.0, 1).is_err());
    }
}
