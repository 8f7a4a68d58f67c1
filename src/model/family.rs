//! Quasi-Poisson response family on the log link.
//!
//! Clutch size is a small-range count whose variance does not track a strict
//! Poisson assumption, so the variance function is `Var = φ·μ` with the
//! dispersion `φ` estimated from Pearson residuals instead of fixed at 1.
//! The IRLS working quantities are identical to Poisson; only the
//! uncertainty scaling changes.

/// Clamp bound for the linear predictor before exponentiation.
const ETA_BOUND: f64 = 30.0;

/// Inverse link: `μ = exp(η)`, clamped for numerical safety.
pub fn inv_link(eta: f64) -> f64 {
    eta.clamp(-ETA_BOUND, ETA_BOUND).exp()
}

/// Starting linear predictor: `log(y + 0.5)` guards against zero counts.
pub fn initial_eta(y: &[f64]) -> Vec<f64> {
    y.iter().map(|&v| (v + 0.5).ln()).collect()
}

/// IRLS working weight and working response for one observation.
///
/// For the log link: `w = μ`, `z = η + (y − μ)/μ`.
pub fn working_point(y: f64, eta: f64) -> (f64, f64) {
    let mu = inv_link(eta).max(1e-8);
    (mu, eta + (y - mu) / mu)
}

/// Pearson dispersion estimate `φ = Σ (y−μ)²/μ / (n − edf)`.
pub fn pearson_dispersion(y: &[f64], mu: &[f64], edf_total: f64) -> f64 {
    let n = y.len() as f64;
    let denom = (n - edf_total).max(1.0);
    let pearson: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(1e-8);
            (yi - m) * (yi - m) / m
        })
        .sum();
    pearson / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_point_is_exact_at_the_mean() {
        let (w, z) = working_point(3.0, 3.0f64.ln());
        assert!((w - 3.0).abs() < 1e-12);
        assert!((z - 3.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn dispersion_is_unit_for_poisson_like_residuals() {
        // Residuals scaled exactly to the variance function give φ = 1.
        let mu: [f64; 4] = [2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = mu.iter().map(|&m| m + m.sqrt()).collect();
        let phi = pearson_dispersion(&y, &mu, 0.0);
        assert!((phi - 1.0).abs() < 1e-12);
    }
}
