//! Design-matrix assembly for the additive mixed model
//!
//! ```text
//! log E[clutch] = f_age(age) + f_date(julian_date) + β·lifespan
//!                 + b_female + b_year
//! ```
//!
//! Layout (contiguous column blocks, addressed only through `TermMap`):
//!
//! - intercept
//! - age spline (sum-to-zero constrained B-spline columns, difference penalty)
//! - laying-date spline (constrained, difference penalty)
//! - lifespan (centered, unpenalized linear term)
//! - female indicator block (ridge penalty = random intercepts)
//! - year indicator block (ridge penalty = random intercepts)
//!
//! A B-spline basis partitions unity, so an unconstrained (or merely
//! column-centered) smooth block carries a constant direction that the
//! intercept already spans and the difference penalty cannot fix — the
//! penalized normal equations would be exactly singular. Each smooth is
//! therefore reparameterized under the sum-to-zero constraint `1ᵀβ = 0`
//! (one column dropped, `B_j ↦ B_j − B_k`), and its penalty rows are
//! transformed by the same map. The transformed columns are additionally
//! sample-centered so partial effects average to zero; that only shifts the
//! intercept and cannot reintroduce the degeneracy. Indicator blocks also
//! sum to one per row, but their ridge penalty keeps the penalized system
//! positive definite.

use std::collections::BTreeSet;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};

use crate::domain::{ClutchRecord, ModelConfig, Term};
use crate::error::AppError;
use crate::math::{second_difference_rows, BSplineBasis, PenaltyBlock};

/// Fewest eligible observations worth fitting at all.
const MIN_OBS: usize = 10;

/// Fewest distinct age classes for a cubic age smooth with the
/// (distinct − 1) ceiling.
const MIN_AGE_CLASSES: usize = 5;

/// Stable mapping from logical term to design columns.
#[derive(Debug, Clone)]
pub struct TermMap {
    pub intercept: usize,
    pub age: Range<usize>,
    pub date: Range<usize>,
    pub lifespan: usize,
    pub female: Range<usize>,
    pub year: Range<usize>,
}

impl TermMap {
    pub fn columns(&self, term: Term) -> Range<usize> {
        match term {
            Term::AgeSmooth => self.age.clone(),
            Term::DateSmooth => self.date.clone(),
            Term::Lifespan => self.lifespan..self.lifespan + 1,
            Term::FemaleIntercepts => self.female.clone(),
            Term::YearIntercepts => self.year.clone(),
        }
    }

    pub fn n_columns(&self) -> usize {
        self.year.end
    }
}

/// Smoothing parameters, one per penalized block.
#[derive(Debug, Clone, Copy)]
pub struct Lambdas {
    pub age: f64,
    pub date: f64,
    pub female: f64,
    pub year: f64,
}

/// Fully assembled design for the eligible records.
#[derive(Debug, Clone)]
pub struct ModelDesign {
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    pub term_map: TermMap,
    /// Per-row age, aligned with the design rows.
    pub ages: Vec<f64>,
    /// Per-row laying date, aligned with the design rows.
    pub dates: Vec<f64>,
    pub n_distinct_ages: usize,
    /// The age basis dimension hit its (distinct ages − 1) ceiling, so a
    /// basis-adequacy flag on this term is expected and not actionable.
    pub k_age_at_ceiling: bool,
    pub female_levels: Vec<String>,
    pub year_levels: Vec<i32>,
    /// Second-difference penalty rows for the age smooth, already mapped
    /// into the constrained parameterization.
    age_penalty: DMatrix<f64>,
    /// Same for the laying-date smooth.
    date_penalty: DMatrix<f64>,
}

impl ModelDesign {
    /// Penalty blocks for a given set of smoothing parameters.
    pub fn penalty_blocks(&self, lambdas: Lambdas) -> Vec<PenaltyBlock> {
        vec![
            PenaltyBlock {
                rows: self.age_penalty.clone(),
                offset: self.term_map.age.start,
                lambda: lambdas.age,
            },
            PenaltyBlock {
                rows: self.date_penalty.clone(),
                offset: self.term_map.date.start,
                lambda: lambdas.date,
            },
            PenaltyBlock {
                rows: DMatrix::identity(self.female_levels.len(), self.female_levels.len()),
                offset: self.term_map.female.start,
                lambda: lambdas.female,
            },
            PenaltyBlock {
                rows: DMatrix::identity(self.year_levels.len(), self.year_levels.len()),
                offset: self.term_map.year.start,
                lambda: lambdas.year,
            },
        ]
    }

    /// Columns of the design restricted to one term, as an owned matrix.
    pub fn term_columns(&self, term: Term) -> DMatrix<f64> {
        let range = self.term_map.columns(term);
        self.x.columns(range.start, range.len()).into_owned()
    }

    /// Columns of the design for every term except `excluded` (intercept
    /// always included). Used by the concurvity diagnostic.
    pub fn columns_excluding(&self, excluded: Term) -> DMatrix<f64> {
        let keep: Vec<usize> = (0..self.term_map.n_columns())
            .filter(|c| !self.term_map.columns(excluded).contains(c))
            .collect();
        let mut m = DMatrix::<f64>::zeros(self.x.nrows(), keep.len());
        for (out_j, &j) in keep.iter().enumerate() {
            for i in 0..self.x.nrows() {
                m[(i, out_j)] = self.x[(i, j)];
            }
        }
        m
    }
}

/// Build the model design from the eligible records.
///
/// The age basis dimension is `config.k_age`, capped at one less than the
/// number of distinct age classes (over-fitting guard); `0` requests the
/// cap itself.
pub fn build_design(records: &[ClutchRecord], config: &ModelConfig) -> Result<ModelDesign, AppError> {
    if records.len() < MIN_OBS {
        return Err(AppError::insufficient_data(format!(
            "Trajectory model needs at least {MIN_OBS} eligible records, got {}.",
            records.len()
        )));
    }

    let distinct_ages: BTreeSet<u32> = records.iter().map(|r| r.age).collect();
    if distinct_ages.len() < MIN_AGE_CLASSES {
        return Err(AppError::insufficient_data(format!(
            "Age smooth needs at least {MIN_AGE_CLASSES} distinct age classes, got {}.",
            distinct_ages.len()
        )));
    }

    let ceiling = distinct_ages.len() - 1;
    let k_age = if config.k_age == 0 {
        ceiling
    } else {
        config.k_age.min(ceiling)
    }
    .max(4);
    let k_age_at_ceiling = k_age >= ceiling;

    let k_date = config.k_date.max(4);

    let ages: Vec<f64> = records.iter().map(|r| f64::from(r.age)).collect();
    let dates: Vec<f64> = records.iter().map(|r| r.julian_date).collect();

    let (age_min, age_max) = min_max(&ages);
    let (date_min, date_max) = min_max(&dates);
    if !(date_max > date_min) {
        return Err(AppError::insufficient_data(
            "Laying-date smooth needs variation in `julian_date`.",
        ));
    }

    let age_basis = BSplineBasis::cubic(age_min, age_max, k_age)?;
    let date_basis = BSplineBasis::cubic(date_min, date_max, k_date)?;

    let mut female_levels: Vec<String> = records.iter().map(|r| r.female_id.clone()).collect();
    female_levels.sort();
    female_levels.dedup();
    let mut year_levels: Vec<i32> = records.iter().map(|r| r.year).collect();
    year_levels.sort_unstable();
    year_levels.dedup();

    if female_levels.len() < 2 {
        return Err(AppError::insufficient_data(
            "Female random intercept needs at least 2 individuals.",
        ));
    }
    if year_levels.len() < 2 {
        return Err(AppError::insufficient_data(
            "Year random intercept needs at least 2 breeding seasons.",
        ));
    }

    let n = records.len();
    let n_f = female_levels.len();
    let n_y = year_levels.len();

    // One column per smooth is dropped by the sum-to-zero constraint.
    let m_age = k_age - 1;
    let m_date = k_date - 1;

    let term_map = TermMap {
        intercept: 0,
        age: 1..1 + m_age,
        date: 1 + m_age..1 + m_age + m_date,
        lifespan: 1 + m_age + m_date,
        female: 2 + m_age + m_date..2 + m_age + m_date + n_f,
        year: 2 + m_age + m_date + n_f..2 + m_age + m_date + n_f + n_y,
    };

    let mut x = DMatrix::<f64>::zeros(n, term_map.n_columns());
    let mut row_age = vec![0.0; k_age];
    let mut row_date = vec![0.0; k_date];

    let lifespan_mean =
        records.iter().map(|r| r.lifespan).sum::<f64>() / n as f64;

    for (i, record) in records.iter().enumerate() {
        x[(i, term_map.intercept)] = 1.0;

        age_basis.eval_into(ages[i], &mut row_age);
        for j in 0..m_age {
            x[(i, term_map.age.start + j)] = row_age[j] - row_age[k_age - 1];
        }

        date_basis.eval_into(dates[i], &mut row_date);
        for j in 0..m_date {
            x[(i, term_map.date.start + j)] = row_date[j] - row_date[k_date - 1];
        }

        x[(i, term_map.lifespan)] = record.lifespan - lifespan_mean;

        let fi = female_levels
            .binary_search(&record.female_id)
            .map_err(|_| AppError::internal("Female level lookup failed."))?;
        x[(i, term_map.female.start + fi)] = 1.0;

        let yi = year_levels
            .binary_search(&record.year)
            .map_err(|_| AppError::internal("Year level lookup failed."))?;
        x[(i, term_map.year.start + yi)] = 1.0;
    }

    center_columns(&mut x, &term_map.age);
    center_columns(&mut x, &term_map.date);

    let y = DVector::from_iterator(n, records.iter().map(|r| f64::from(r.clutch_size)));

    Ok(ModelDesign {
        x,
        y,
        term_map,
        ages,
        dates,
        n_distinct_ages: distinct_ages.len(),
        k_age_at_ceiling,
        female_levels,
        year_levels,
        age_penalty: second_difference_rows(k_age) * sum_to_zero_basis(k_age),
        date_penalty: second_difference_rows(k_date) * sum_to_zero_basis(k_date),
    })
}

/// The `k × (k−1)` map of the sum-to-zero reparameterization: coefficient
/// `j` becomes `B_j − B_k`, so the constrained coefficients always satisfy
/// `1ᵀβ = 0` in the original basis.
fn sum_to_zero_basis(k: usize) -> DMatrix<f64> {
    let mut z = DMatrix::<f64>::zeros(k, k - 1);
    for j in 0..k - 1 {
        z[(j, j)] = 1.0;
        z[(k - 1, j)] = -1.0;
    }
    z
}

fn center_columns(x: &mut DMatrix<f64>, range: &Range<usize>) {
    let n = x.nrows();
    for j in range.clone() {
        let mean = (0..n).map(|i| x[(i, j)]).sum::<f64>() / n as f64;
        for i in 0..n {
            x[(i, j)] -= mean;
        }
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(female: &str, age: u32, clutch: u32, date: f64, lifespan: f64, year: i32) -> ClutchRecord {
        ClutchRecord {
            female_id: female.to_string(),
            age,
            clutch_size: clutch,
            julian_date: date,
            lifespan,
            year,
        }
    }

    fn small_population() -> Vec<ClutchRecord> {
        let mut out = Vec::new();
        for f in 0..6 {
            for age in 1..=6u32 {
                out.push(record(
                    &format!("F{f}"),
                    age,
                    3,
                    110.0 + f64::from(age) + f as f64,
                    7.0 + f as f64 % 3.0,
                    2000 + i32::try_from(age).unwrap() % 4,
                ));
            }
        }
        out
    }

    #[test]
    fn design_has_expected_shape_and_term_map() {
        let records = small_population();
        let design = build_design(&records, &ModelConfig::default()).unwrap();

        // 6 distinct ages: auto k_age = 5 at the ceiling, minus the
        // sum-to-zero constraint column.
        assert_eq!(design.term_map.age.len(), 4);
        assert!(design.k_age_at_ceiling);
        assert_eq!(design.female_levels.len(), 6);
        assert_eq!(design.year_levels.len(), 4);
        assert_eq!(design.x.nrows(), records.len());
        assert_eq!(
            design.x.ncols(),
            2 + 4 + (ModelConfig::default().k_date - 1) + 6 + 4
        );
    }

    #[test]
    fn penalized_system_is_positive_definite() {
        // The raw B-spline columns of each smooth sum to one per row, which
        // overlaps the intercept; the constrained parameterization must
        // leave the penalized normal equations solvable by Cholesky for
        // every candidate lambda, not just some of them.
        let design = build_design(&small_population(), &ModelConfig::default()).unwrap();
        let z = design.y.map(|v| (v + 0.5).ln());
        let w = vec![1.0; design.x.nrows()];

        for &lambda in &[1e-3, 1.0, 1e3] {
            let blocks = design.penalty_blocks(Lambdas {
                age: lambda,
                date: lambda,
                female: lambda,
                year: lambda,
            });
            let full = crate::math::penalized_wls_full(&design.x, &z, &w, &blocks)
                .unwrap_or_else(|| panic!("singular system at lambda {lambda}"));
            assert!(full.log_det_h.is_finite());
            assert!(full.beta.iter().all(|v| v.is_finite()));
            assert!(full.edf.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn smooth_blocks_are_centered() {
        let design = build_design(&small_population(), &ModelConfig::default()).unwrap();
        for j in design.term_map.age.clone().chain(design.term_map.date.clone()) {
            let mean: f64 =
                (0..design.x.nrows()).map(|i| design.x[(i, j)]).sum::<f64>() / design.x.nrows() as f64;
            assert!(mean.abs() < 1e-10, "column {j} mean {mean}");
        }
    }

    #[test]
    fn too_few_age_classes_is_insufficient_data() {
        let records: Vec<ClutchRecord> = (0..20u32)
            .map(|i| {
                record(
                    &format!("F{}", i % 5),
                    1 + i % 3,
                    3,
                    100.0 + f64::from(i),
                    6.0,
                    2000 + (i % 3) as i32,
                )
            })
            .collect();
        let err = build_design(&records, &ModelConfig::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }
}
