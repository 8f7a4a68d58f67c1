//! Distribution helpers for significance reporting.
//!
//! The breakpoint stage only needs the standard normal CDF (slope tests use
//! a normal approximation; age-class counts are far too small for the t/z
//! distinction to change any conclusion at the reported precision).

/// Standard normal CDF via the Abramowitz–Stegun 26.2.17 polynomial.
///
/// Absolute error is below 7.5e-8, ample for reported p-values.
pub fn normal_cdf(x: f64) -> f64 {
    let z = x.clamp(-30.0, 30.0).abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * z);
    let inv_sqrt_2pi = 0.398_942_280_401_432_7;
    let pdf = inv_sqrt_2pi * (-0.5 * z * z).exp();
    let poly = (((((1.330_274_429 * t - 1.821_255_978) * t) + 1.781_477_937) * t
        - 0.356_563_782)
        * t
        + 0.319_381_530)
        * t;
    let cdf_pos = 1.0 - pdf * poly;
    if x >= 0.0 { cdf_pos } else { 1.0 - cdf_pos }
}

/// Two-sided p-value for a standard-normal test statistic.
pub fn two_sided_p(z: f64) -> f64 {
    (2.0 * normal_cdf(-z.abs())).clamp(0.0, 1.0)
}
