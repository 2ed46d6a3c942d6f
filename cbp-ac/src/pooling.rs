//! Rubin's rules
//!
//! Pooling lives here rather than in the model routines so every routine
//! and every sensitivity scenario combines per-table fits the same way.

use cbp_common::stats::{mean, sample_variance};
use cbp_common::{Error, Result};

/// Pooled point estimate and its variance components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pooled {
    pub estimate: f64,
    /// Mean within-table variance `W`
    pub within: f64,
    /// Between-table variance `B` (ddof = 1; zero for a single table)
    pub between: f64,
    pub m: usize,
}

impl Pooled {
    /// `T = W + (1 + 1/m) B`
    pub fn variance(&self) -> f64 {
        self.within + (1.0 + 1.0 / self.m as f64) * self.between
    }

    pub fn se(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Pool per-table estimates `θ_k` with variances `U_k`
pub fn rubin(estimates: &[f64], variances: &[f64]) -> Result<Pooled> {
    if estimates.is_empty() || estimates.len() != variances.len() {
        return Err(Error::InvalidInput(format!(
            "cannot pool {} estimates with {} variances",
            estimates.len(),
            variances.len()
        )));
    }
    let m = estimates.len();
    Ok(Pooled {
        estimate: mean(estimates).unwrap_or(f64::NAN),
        within: mean(variances).unwrap_or(f64::NAN),
        between: if m > 1 {
            sample_variance(estimates).unwrap_or(0.0)
        } else {
            0.0
        },
        m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_table_passes_through() {
        let pooled = rubin(&[0.4], &[0.01]).unwrap();
        assert_eq!(pooled.estimate, 0.4);
        assert_eq!(pooled.variance(), 0.01);
    }

    #[test]
    fn test_known_values() {
        // mean 2, W = 0.5, B = 1, T = 0.5 + (4/3) * 1
        let pooled = rubin(&[1.0, 2.0, 3.0], &[0.4, 0.5, 0.6]).unwrap();
        assert!((pooled.estimate - 2.0).abs() < 1e-12);
        assert!((pooled.within - 0.5).abs() < 1e-12);
        assert!((pooled.between - 1.0).abs() < 1e-12);
        assert!((pooled.variance() - (0.5 + 4.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(rubin(&[], &[]).is_err());
        assert!(rubin(&[1.0, 2.0], &[0.1]).is_err());
    }

    proptest! {
        /// PROPERTY: T equals mean(U) + (1 + 1/m) var(θ) with ddof = 1
        #[test]
        fn prop_pooling_identity(
            fits in prop::collection::vec((-10.0f64..10.0, 0.001f64..5.0), 2..12)
        ) {
            let (theta, u): (Vec<f64>, Vec<f64>) = fits.into_iter().unzip();
            let m = theta.len() as f64;
            let pooled = rubin(&theta, &u).unwrap();
            let tbar = theta.iter().sum::<f64>() / m;
            let b = theta.iter().map(|t| (t - tbar).powi(2)).sum::<f64>() / (m - 1.0);
            let expected = u.iter().sum::<f64>() / m + (1.0 + 1.0 / m) * b;
            prop_assert!((pooled.variance() - expected).abs() <= 1e-9 * expected.max(1.0));
            prop_assert!(pooled.variance() >= pooled.within);
        }
    }
}
