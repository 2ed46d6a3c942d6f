//! Descriptive statistics and normal-tail helpers
//!
//! All functions take already-masked observed values. Empty input yields
//! `None` rather than NaN so callers decide how to report it.

use std::collections::HashSet;

/// Two-sided 95% normal critical value
pub const Z_975: f64 = 1.959963984540054;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (ddof = 0)
pub fn population_sd(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / values.len() as f64).sqrt())
}

/// Sample variance (ddof = 1); `None` below two values
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

pub fn sample_sd(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Quantile with linear interpolation between order statistics
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().cloned().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().cloned().reduce(f64::max)
}

/// Number of distinct observed raw values (trimmed text)
pub fn n_unique<'a, I: IntoIterator<Item = &'a str>>(values: I) -> usize {
    values.into_iter().map(str::trim).collect::<HashSet<_>>().len()
}

// ========================================
// Normal distribution
// ========================================

/// Complementary error function (Chebyshev fit, fractional error < 1.2e-7)
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let r = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277)))))))))
            .exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

/// Standard normal CDF
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Upper tail `P(Z > z)`
pub fn normal_survival(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Two-sided p-value of a Wald statistic
pub fn two_sided_p(z: f64) -> f64 {
    if !z.is_finite() {
        return 0.0;
    }
    (2.0 * normal_survival(z.abs())).clamp(0.0, 1.0)
}

/// Wald interval and p-value at 95% for an estimate and standard error
pub fn wald(estimate: f64, se: f64) -> (f64, f64, f64) {
    let half = Z_975 * se;
    let p = if se > 0.0 { two_sided_p(estimate / se) } else { 0.0 };
    (estimate - half, estimate + half, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_moments() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), Some(5.0));
        assert_eq!(population_sd(&v), Some(2.0));
        assert!(close(sample_variance(&v).unwrap(), 32.0 / 7.0, 1e-12));
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_variance(&[1.0]), None);
    }

    #[test]
    fn test_quantiles_interpolate() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 0.5), Some(2.5));
        assert_eq!(quantile(&v, 0.25), Some(1.75));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
    }

    #[test]
    fn test_normal_tail() {
        assert!(close(normal_cdf(0.0), 0.5, 1e-7));
        assert!(close(two_sided_p(Z_975), 0.05, 1e-6));
        assert!(close(normal_survival(1.0), 0.158655254, 1e-6));
        assert_eq!(two_sided_p(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_wald_interval_contains_estimate() {
        let (lo, hi, p) = wald(0.5, 0.1);
        assert!(lo < 0.5 && 0.5 < hi);
        assert!(p < 0.001);
    }

    #[test]
    fn test_n_unique_trims() {
        assert_eq!(n_unique(["1", " 1", "2", ""]), 3);
    }
}
