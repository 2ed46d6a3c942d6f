//! Sensitivity scenarios
//!
//! Each scenario re-runs (or rescales) the model routine and yields its own
//! result row tagged with a `scenario_id`:
//! - `primary`: the registered analysis
//! - `deff_<d>`: primary standard error inflated by `√d`
//! - `jackknife_k<k>`: delete-a-group jackknife over `k` contiguous blocks
//!   of the analytic sample
//! - `pseudo_weights_deff<d>`: `R` log-normal weight draws with
//!   `σ² = ln(d)`, draw `r` seeded with `seed + r`, pooled with Rubin's rules

use crate::fit::{estimate, Fit};
use crate::model::ModelKind;
use crate::pooling::{rubin, Pooled};
use crate::prepare::Prepared;
use crate::results::PRIMARY_SCENARIO;
use cbp_common::config::SensitivityConfig;
use cbp_common::dataset::format_number;
use cbp_common::{Error, Result, SeedService};
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    Primary,
    DesignEffect(f64),
    Jackknife(usize),
    PseudoWeights { deff: f64, draws: usize },
}

impl Scenario {
    pub fn id(&self) -> String {
        match self {
            Scenario::Primary => PRIMARY_SCENARIO.to_string(),
            Scenario::DesignEffect(d) => format!("deff_{}", format_number(*d)),
            Scenario::Jackknife(k) => format!("jackknife_k{}", k),
            Scenario::PseudoWeights { deff, .. } => format!("pseudo_weights_deff{}", format_number(*deff)),
        }
    }

    /// Limitation text recorded on the scenario's rows
    pub fn describe(&self) -> String {
        match self {
            Scenario::Primary => "registered analysis".to_string(),
            Scenario::DesignEffect(d) => format!("standard error inflated by sqrt({})", format_number(*d)),
            Scenario::Jackknife(k) => format!("delete-a-group jackknife over {} contiguous blocks", k),
            Scenario::PseudoWeights { deff, draws } => format!(
                "{} log-normal pseudo-weight draws with DEFF {}",
                draws,
                format_number(*deff)
            ),
        }
    }
}

/// Scenarios configured for the run, primary first
pub fn scenarios(config: &SensitivityConfig) -> Result<Vec<Scenario>> {
    let mut out = vec![Scenario::Primary];
    for &d in &config.deff {
        if !(d.is_finite() && d >= 1.0) {
            return Err(Error::Config(format!("sensitivity.deff values must be >= 1 (got {})", d)));
        }
        out.push(Scenario::DesignEffect(d));
    }
    if let Some(k) = config.jackknife_k {
        if k < 2 {
            return Err(Error::Config(format!("sensitivity.jackknife_k must be >= 2 (got {})", k)));
        }
        out.push(Scenario::Jackknife(k));
    }
    if let Some(deff) = config.pseudo_weight_deff {
        if !(deff.is_finite() && deff > 1.0) {
            return Err(Error::Config(format!(
                "sensitivity.pseudo_weight_deff must be > 1 (got {})",
                deff
            )));
        }
        if config.pseudo_weight_draws < 2 {
            return Err(Error::Config("sensitivity.pseudo_weight_draws must be >= 2".to_string()));
        }
        out.push(Scenario::PseudoWeights {
            deff,
            draws: config.pseudo_weight_draws,
        });
    }
    Ok(out)
}

/// Estimate and variance for one completed table under a scenario
///
/// `primary` is the table's primary fit, reused by the rescaling scenario.
pub fn run_scenario(
    scenario: &Scenario,
    kind: ModelKind,
    sample: &Prepared,
    primary: &Fit,
    seeds: &SeedService,
) -> Result<(f64, f64)> {
    match scenario {
        Scenario::Primary => Ok((primary.estimate, primary.variance)),
        Scenario::DesignEffect(d) => Ok((primary.estimate, primary.variance * d)),
        Scenario::Jackknife(k) => jackknife(kind, sample, *k),
        Scenario::PseudoWeights { deff, draws } => {
            let pooled = pseudo_weights(kind, sample, *deff, *draws, seeds)?;
            Ok((pooled.estimate, pooled.variance()))
        }
    }
}

/// Block `g` of `k` over `n` rows: `[g·n/k, (g+1)·n/k)`
fn block(n: usize, k: usize, g: usize) -> std::ops::Range<usize> {
    (g * n / k)..((g + 1) * n / k)
}

/// Delete-a-group jackknife: `θ̂` is the full-sample fit, variance
/// `(k-1)/k · Σ (θ_g - θ̄)²`
pub fn jackknife(kind: ModelKind, sample: &Prepared, k: usize) -> Result<(f64, f64)> {
    let n = sample.n();
    if k > n {
        return Err(Error::NumericallyDegenerate(format!(
            "jackknife with {} blocks over {} rows",
            k, n
        )));
    }
    let full = estimate(kind, sample)?;
    let replicates: Vec<f64> = (0..k)
        .map(|g| estimate(kind, &sample.without(block(n, k, g))).map(|f| f.estimate))
        .collect::<Result<_>>()?;
    let mean = replicates.iter().sum::<f64>() / k as f64;
    let variance = (k as f64 - 1.0) / k as f64 * replicates.iter().map(|t| (t - mean).powi(2)).sum::<f64>();
    Ok((full.estimate, variance))
}

/// Standard normal draw (Box-Muller)
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Log-normal pseudo-weights for every source row, mean one
///
/// `1 + CV² = DEFF` for a log-normal with `σ² = ln(DEFF)`.
pub fn draw_weights<R: Rng>(rng: &mut R, n_source: usize, deff: f64) -> Vec<f64> {
    let sigma2 = deff.ln();
    let sigma = sigma2.sqrt();
    (0..n_source)
        .map(|_| (sigma * standard_normal(rng) - sigma2 / 2.0).exp())
        .collect()
}

/// Fit under `draws` pseudo-weight vectors and pool them
///
/// Weights are drawn per source row so a respondent carries the same
/// weight in draw `r` across hypotheses.
pub fn pseudo_weights(
    kind: ModelKind,
    sample: &Prepared,
    deff: f64,
    draws: usize,
    seeds: &SeedService,
) -> Result<Pooled> {
    let mut estimates = Vec::with_capacity(draws);
    let mut variances = Vec::with_capacity(draws);
    for r in 1..=draws as u64 {
        let mut rng = seeds.rng(r)?;
        let all = draw_weights(&mut rng, sample.n_source, deff);
        let weights: Vec<f64> = sample.rows.iter().map(|&i| all[i]).collect();
        let fit = estimate(kind, &sample.with_weights(weights))?;
        estimates.push(fit.estimate);
        variances.push(fit.variance);
    }
    rubin(&estimates, &variances)
}
