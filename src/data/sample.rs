//! Synthetic breeding-population generation.
//!
//! Generates a longitudinal dataset with the structure the model expects:
//! repeated clutches per female across years, a known age trajectory on the
//! link scale, persistent female quality, shared year effects, and a
//! fraction of still-alive females whose lifespan is unknown.
//!
//! All randomness flows from a single seeded `StdRng`, so a given
//! `SampleConfig` always produces the same population.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Poisson};

use crate::domain::{ClutchRow, TrajectoryShape};
use crate::error::AppError;

/// Baseline clutch size on the link scale (`exp(1.6) ≈ 5` eggs).
const BASE_LOG_CLUTCH: f64 = 1.6;

/// Age at which the peaked trajectory turns over.
const PEAK_AGE: f64 = 4.0;

/// Fraction of females still alive at generation time (unknown lifespan).
const ALIVE_FRACTION: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Number of females in the population.
    pub females: usize,
    pub seed: u64,
    pub shape: TrajectoryShape,
    /// Residual noise on the link scale, on top of Poisson sampling.
    pub noise_sd: f64,
    /// First breeding season of the earliest cohort.
    pub start_year: i32,
    /// Number of cohort entry years.
    pub years: usize,
    /// Maximum attainable age.
    pub max_age: u32,
    /// Between-female quality SD on the link scale.
    pub quality_sd: f64,
    /// Between-year SD on the link scale.
    pub year_sd: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            females: 80,
            seed: 42,
            shape: TrajectoryShape::Peaked,
            noise_sd: 0.05,
            start_year: 2000,
            years: 12,
            max_age: 9,
            quality_sd: 0.1,
            year_sd: 0.05,
        }
    }
}

/// Age trajectory on the link scale.
fn age_signal(shape: TrajectoryShape, age: u32) -> f64 {
    let a = f64::from(age);
    match shape {
        TrajectoryShape::Peaked => {
            if a <= PEAK_AGE {
                0.10 * (a - 1.0)
            } else {
                0.10 * (PEAK_AGE - 1.0) - 0.06 * (a - PEAK_AGE)
            }
        }
        TrajectoryShape::Linear => 0.04 * (a - 1.0),
    }
}

pub fn generate_population(config: &SampleConfig) -> Result<Vec<ClutchRow>, AppError> {
    if config.females == 0 {
        return Err(AppError::data_format("Sample female count must be > 0."));
    }
    if config.years == 0 {
        return Err(AppError::data_format("Sample year count must be > 0."));
    }
    if config.max_age < 6 {
        return Err(AppError::data_format(
            "Sample max age must be >= 6 so the model has enough age classes.",
        ));
    }
    if !(config.noise_sd.is_finite() && config.noise_sd >= 0.0) {
        return Err(AppError::data_format("Sample noise SD must be finite and >= 0."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let quality = Normal::new(0.0, config.quality_sd)
        .map_err(|e| AppError::internal(format!("Sample quality distribution: {e}")))?;
    let noise = Normal::new(0.0, config.noise_sd)
        .map_err(|e| AppError::internal(format!("Sample noise distribution: {e}")))?;
    let date_jitter = Normal::new(0.0, 8.0)
        .map_err(|e| AppError::internal(format!("Sample date distribution: {e}")))?;

    let year_noise = Normal::new(0.0, config.year_sd)
        .map_err(|e| AppError::internal(format!("Sample year distribution: {e}")))?;

    // One shared effect per calendar year a clutch could fall in.
    let n_effect_years = config.years + config.max_age as usize;
    let year_effects: Vec<f64> = (0..n_effect_years)
        .map(|_| year_noise.sample(&mut rng))
        .collect();

    let mut rows = Vec::new();

    for i in 0..config.females {
        let female_id = format!("F{:04}", i + 1);
        let q = quality.sample(&mut rng);
        let first_year = config.start_year + rng.gen_range(0..config.years as i32);
        let lifespan = rng.gen_range(1..=config.max_age);

        // A still-alive female is censored at some age she has reached so
        // far; her lifespan column stays empty.
        let alive = rng.r#gen::<f64>() < ALIVE_FRACTION;
        let observed_to = if alive {
            rng.gen_range(1..=lifespan)
        } else {
            lifespan
        };

        for age in 1..=observed_to {
            let year = first_year + age as i32 - 1;
            let year_idx = (year - config.start_year) as usize;
            let year_effect = year_effects.get(year_idx).copied().unwrap_or(0.0);

            // Experienced females lay slightly earlier in the season.
            let julian_date =
                (125.0 - 1.5 * f64::from(age - 1) + date_jitter.sample(&mut rng)).clamp(80.0, 180.0);
            // Mid-season clutches are slightly larger.
            let date_effect = -0.00005 * (julian_date - 125.0).powi(2);

            let eta = BASE_LOG_CLUTCH
                + age_signal(config.shape, age)
                + date_effect
                + q
                + year_effect
                + noise.sample(&mut rng);
            let mu = eta.exp().max(1e-6);

            let clutch_size = Poisson::new(mu)
                .map_err(|e| AppError::internal(format!("Sample clutch distribution: {e}")))?
                .sample(&mut rng) as u32;

            rows.push(ClutchRow {
                female_id: female_id.clone(),
                age,
                clutch_size,
                julian_date,
                lifespan: (!alive).then_some(f64::from(lifespan)),
                year,
            });
        }
    }

    Ok(rows)
}

/// Write a generated population to CSV in the exact schema `fit` ingests.
pub fn write_sample_csv(path: &Path, rows: &[ClutchRow]) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::data_format(format!(
            "Failed to create sample CSV '{}': {e}",
            path.display()
        ))
    })?;

    writeln!(file, "female_id,age,clutch_size,julian_date,lifespan,year")
        .map_err(|e| AppError::data_format(format!("Failed to write sample CSV header: {e}")))?;

    for row in rows {
        let lifespan = row
            .lifespan
            .map(|l| format!("{l}"))
            .unwrap_or_default();
        writeln!(
            file,
            "{},{},{},{:.1},{},{}",
            row.female_id, row.age, row.clutch_size, row.julian_date, lifespan, row.year
        )
        .map_err(|e| AppError::data_format(format!("Failed to write sample CSV row: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_population() {
        let config = SampleConfig::default();
        let a = generate_population(&config).unwrap();
        let b = generate_population(&config).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.female_id, y.female_id);
            assert_eq!(x.age, y.age);
            assert_eq!(x.clutch_size, y.clutch_size);
            assert_eq!(x.julian_date.to_bits(), y.julian_date.to_bits());
            assert_eq!(x.year, y.year);
        }
    }

    #[test]
    fn population_has_model_usable_structure() {
        let rows = generate_population(&SampleConfig::default()).unwrap();

        let distinct_ages: std::collections::HashSet<u32> = rows.iter().map(|r| r.age).collect();
        assert!(distinct_ages.len() >= 5, "only {} ages", distinct_ages.len());

        // Some females are still alive (censored lifespan), some closed.
        assert!(rows.iter().any(|r| r.lifespan.is_none()));
        assert!(rows.iter().any(|r| r.lifespan.is_some()));

        // Lifespan is never below the age it is attached to.
        for row in &rows {
            if let Some(l) = row.lifespan {
                assert!(l >= f64::from(row.age));
            }
        }
    }

    #[test]
    fn peaked_shape_rises_then_falls() {
        assert!(age_signal(TrajectoryShape::Peaked, 4) > age_signal(TrajectoryShape::Peaked, 1));
        assert!(age_signal(TrajectoryShape::Peaked, 9) < age_signal(TrajectoryShape::Peaked, 4));
    }

    #[test]
    fn linear_shape_is_monotone() {
        let values: Vec<f64> =
            (1..=9).map(|a| age_signal(TrajectoryShape::Linear, a)).collect();
        assert!(values.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn tiny_max_age_is_rejected() {
        let config = SampleConfig {
            max_age: 3,
            ..SampleConfig::default()
        };
        assert!(generate_population(&config).is_err());
    }
}
