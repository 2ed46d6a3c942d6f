//! Model routines
//!
//! Each routine fits one analytic sample and returns the focal coefficient
//! with its variance. Routines never pool: the controller calls them once
//! per completed table and combines the results itself.
//!
//! **Variance:**
//! - unweighted: the model's native estimator
//! - weighted (design or pseudo-weights): HC1 sandwich

use crate::model::ModelKind;
use crate::prepare::Prepared;
use cbp_common::linalg::{dot, invert, mat_mul, mat_vec, xtwx, xtwy, zeros, Matrix};
use cbp_common::{Error, Result};

const IRLS_MAX_ITER: usize = 50;
const NEWTON_MAX_ITER: usize = 100;
const TOLERANCE: f64 = 1e-8;
const MAX_HALVINGS: usize = 30;

/// Focal-coefficient fit for one sample
#[derive(Debug, Clone, PartialEq)]
pub struct Fit {
    pub estimate: f64,
    pub variance: f64,
    pub n: usize,
    /// `key=value` notes carried into the results row
    pub diagnostics: Vec<(String, String)>,
}

impl Fit {
    pub fn se(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Fit `kind` on `sample`; weights come from the sample
pub fn estimate(kind: ModelKind, sample: &Prepared) -> Result<Fit> {
    let fit = match kind {
        ModelKind::Ols => ols(sample)?,
        ModelKind::Logit => logit(sample)?,
        ModelKind::OrdinalLogit => ordinal_logit(sample)?,
    };
    if !fit.estimate.is_finite() || !fit.variance.is_finite() || fit.variance <= 0.0 {
        return Err(Error::NumericallyDegenerate(format!(
            "{} fit for '{}' produced a non-finite or zero variance",
            kind, sample.focal
        )));
    }
    Ok(fit)
}

fn with_intercept(x: &[Vec<f64>]) -> Matrix {
    x.iter()
        .map(|row| std::iter::once(1.0).chain(row.iter().copied()).collect())
        .collect()
}

fn check_df(n: usize, p: usize) -> Result<()> {
    if n <= p {
        return Err(Error::NumericallyDegenerate(format!(
            "{} observations for {} parameters",
            n, p
        )));
    }
    Ok(())
}

/// `bread · meat · bread · n/(n-p)` with per-row scores
fn sandwich(bread: &Matrix, scores: &[Vec<f64>], n: usize, p: usize) -> Matrix {
    let k = bread.len();
    let mut meat = zeros(k, k);
    for s in scores {
        for a in 0..k {
            for b in 0..k {
                meat[a][b] += s[a] * s[b];
            }
        }
    }
    let scale = n as f64 / (n - p) as f64;
    let mut v = mat_mul(&mat_mul(bread, &meat), bread);
    for row in v.iter_mut() {
        for cell in row.iter_mut() {
            *cell *= scale;
        }
    }
    v
}

// ========================================
// Linear regression
// ========================================

fn ols(sample: &Prepared) -> Result<Fit> {
    let x = with_intercept(&sample.x);
    let n = sample.n();
    let p = x.first().map(|r| r.len()).unwrap_or(0);
    check_df(n, p)?;
    let w = sample.weights.as_deref();

    let bread = invert(&xtwx(&x, w))?;
    let beta = mat_vec(&bread, &xtwy(&x, &sample.y, w));
    let resid: Vec<f64> = x.iter().zip(&sample.y).map(|(r, y)| y - dot(r, &beta)).collect();

    let (v, variance_kind) = match w {
        Some(w) => {
            let scores: Vec<Vec<f64>> = x
                .iter()
                .enumerate()
                .map(|(i, r)| r.iter().map(|v| w[i] * resid[i] * v).collect())
                .collect();
            (sandwich(&bread, &scores, n, p), "hc1")
        }
        None => {
            let sigma2 = resid.iter().map(|e| e * e).sum::<f64>() / (n - p) as f64;
            let v = bread
                .iter()
                .map(|row| row.iter().map(|c| c * sigma2).collect())
                .collect();
            (v, "classical")
        }
    };

    let weight = |i: usize| w.map(|w| w[i]).unwrap_or(1.0);
    let total_w: f64 = (0..n).map(weight).sum();
    let ybar = (0..n).map(|i| weight(i) * sample.y[i]).sum::<f64>() / total_w;
    let ss_tot: f64 = (0..n).map(|i| weight(i) * (sample.y[i] - ybar).powi(2)).sum();
    let ss_res: f64 = (0..n).map(|i| weight(i) * resid[i] * resid[i]).sum();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { f64::NAN };

    Ok(Fit {
        estimate: beta[1],
        variance: v[1][1],
        n,
        diagnostics: vec![
            ("variance".into(), variance_kind.into()),
            ("r2".into(), format!("{:.4}", r2)),
            ("df_resid".into(), (n - p).to_string()),
        ],
    })
}

// ========================================
// Binary logistic regression (IRLS)
// ========================================

fn logistic(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

fn logit(sample: &Prepared) -> Result<Fit> {
    if let Some(bad) = sample.y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(Error::InvalidInput(format!(
            "logit outcome '{}' must be coded 0/1 (found {})",
            sample.outcome, bad
        )));
    }
    let x = with_intercept(&sample.x);
    let n = sample.n();
    let p = x.first().map(|r| r.len()).unwrap_or(0);
    check_df(n, p)?;
    let prior = |i: usize| sample.weights.as_ref().map(|w| w[i]).unwrap_or(1.0);

    let mut beta = vec![0.0; p];
    let mut iterations = 0;
    let mut converged = false;
    while iterations < IRLS_MAX_ITER {
        iterations += 1;
        let eta: Vec<f64> = x.iter().map(|r| dot(r, &beta)).collect();
        let mu: Vec<f64> = eta.iter().map(|&e| logistic(e)).collect();
        let w: Vec<f64> = (0..n).map(|i| prior(i) * mu[i] * (1.0 - mu[i])).collect();
        let z: Vec<f64> = (0..n)
            .map(|i| {
                let v = (mu[i] * (1.0 - mu[i])).max(1e-12);
                eta[i] + (sample.y[i] - mu[i]) / v
            })
            .collect();
        let next = mat_vec(&invert(&xtwx(&x, Some(&w)))?, &xtwy(&x, &z, Some(&w)));
        let change = next
            .iter()
            .zip(&beta)
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
        beta = next;
        if change < TOLERANCE {
            converged = true;
            break;
        }
    }
    if !converged || beta.iter().any(|b| !b.is_finite()) {
        return Err(Error::NumericallyDegenerate(format!(
            "logit for '{}' did not converge in {} iterations (separation?)",
            sample.outcome, IRLS_MAX_ITER
        )));
    }

    let mu: Vec<f64> = x.iter().map(|r| logistic(dot(r, &beta))).collect();
    let w: Vec<f64> = (0..n).map(|i| prior(i) * mu[i] * (1.0 - mu[i])).collect();
    let bread = invert(&xtwx(&x, Some(&w)))?;
    let (v, variance_kind) = match &sample.weights {
        Some(weights) => {
            let scores: Vec<Vec<f64>> = x
                .iter()
                .enumerate()
                .map(|(i, r)| r.iter().map(|v| weights[i] * (sample.y[i] - mu[i]) * v).collect())
                .collect();
            (sandwich(&bread, &scores, n, p), "hc1")
        }
        None => (bread, "model"),
    };

    Ok(Fit {
        estimate: beta[1],
        variance: v[1][1],
        n,
        diagnostics: vec![
            ("variance".into(), variance_kind.into()),
            ("odds_ratio".into(), format!("{:.4}", beta[1].exp())),
            ("iterations".into(), iterations.to_string()),
        ],
    })
}

// ========================================
// Proportional-odds cumulative logit
// ========================================

/// Parameters are `[θ_1 .. θ_{J-1}, β_1 .. β_q]` with
/// `P(y ≤ j) = F(θ_j - xβ)`.
struct Ordinal<'a> {
    sample: &'a Prepared,
    /// Category index of each row
    category: Vec<usize>,
    n_cuts: usize,
}

impl<'a> Ordinal<'a> {
    fn new(sample: &'a Prepared) -> Result<Self> {
        let mut levels: Vec<f64> = sample.y.clone();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup();
        if levels.len() < 2 {
            return Err(Error::NumericallyDegenerate(format!(
                "ordinal outcome '{}' has a single observed level",
                sample.outcome
            )));
        }
        let category = sample
            .y
            .iter()
            .map(|v| levels.iter().position(|l| l == v).unwrap_or(0))
            .collect();
        Ok(Self {
            sample,
            category,
            n_cuts: levels.len() - 1,
        })
    }

    fn weight(&self, i: usize) -> f64 {
        self.sample.weights.as_ref().map(|w| w[i]).unwrap_or(1.0)
    }

    fn n_params(&self) -> usize {
        self.n_cuts + self.sample.regressors.len()
    }

    /// Starting values: cumulative marginal logits, zero slopes
    fn start(&self) -> Vec<f64> {
        let total: f64 = (0..self.sample.n()).map(|i| self.weight(i)).sum();
        let mut phi = vec![0.0; self.n_params()];
        let mut cum = 0.0;
        for (j, cut) in phi.iter_mut().take(self.n_cuts).enumerate() {
            cum += (0..self.sample.n())
                .filter(|&i| self.category[i] == j)
                .map(|i| self.weight(i))
                .sum::<f64>();
            let share = (cum / total).clamp(1e-6, 1.0 - 1e-6);
            *cut = (share / (1.0 - share)).ln();
        }
        phi
    }

    /// Cut points are strictly increasing
    fn ordered(&self, phi: &[f64]) -> bool {
        phi[..self.n_cuts].windows(2).all(|w| w[0] < w[1])
    }

    fn bounds(&self, phi: &[f64], i: usize) -> (f64, f64, f64, f64) {
        let eta = dot(&self.sample.x[i], &phi[self.n_cuts..]);
        let c = self.category[i];
        let (fu, du) = if c < self.n_cuts {
            let u = logistic(phi[c] - eta);
            (u, u * (1.0 - u))
        } else {
            (1.0, 0.0)
        };
        let (fl, dl) = if c > 0 {
            let l = logistic(phi[c - 1] - eta);
            (l, l * (1.0 - l))
        } else {
            (0.0, 0.0)
        };
        (fu, fl, du, dl)
    }

    fn log_likelihood(&self, phi: &[f64]) -> f64 {
        if !self.ordered(phi) {
            return f64::NEG_INFINITY;
        }
        (0..self.sample.n())
            .map(|i| {
                let (fu, fl, _, _) = self.bounds(phi, i);
                self.weight(i) * (fu - fl).max(1e-300).ln()
            })
            .sum()
    }

    /// Unweighted per-observation score
    fn score(&self, phi: &[f64], i: usize) -> Vec<f64> {
        let (fu, fl, du, dl) = self.bounds(phi, i);
        let prob = (fu - fl).max(1e-300);
        let c = self.category[i];
        let mut s = vec![0.0; self.n_params()];
        if c < self.n_cuts {
            s[c] += du / prob;
        }
        if c > 0 {
            s[c - 1] -= dl / prob;
        }
        let slope = -(du - dl) / prob;
        for (k, x) in self.sample.x[i].iter().enumerate() {
            s[self.n_cuts + k] = slope * x;
        }
        s
    }

    fn gradient(&self, phi: &[f64]) -> Vec<f64> {
        let mut g = vec![0.0; self.n_params()];
        for i in 0..self.sample.n() {
            let w = self.weight(i);
            for (a, s) in self.score(phi, i).into_iter().enumerate() {
                g[a] += w * s;
            }
        }
        g
    }

    /// Central-difference Hessian of the log-likelihood, symmetrized
    fn hessian(&self, phi: &[f64]) -> Matrix {
        let k = phi.len();
        let mut h = zeros(k, k);
        for a in 0..k {
            let step = 1e-5 * phi[a].abs().max(1.0);
            let mut up = phi.to_vec();
            let mut down = phi.to_vec();
            up[a] += step;
            down[a] -= step;
            let (gu, gd) = (self.gradient(&up), self.gradient(&down));
            for b in 0..k {
                h[b][a] = (gu[b] - gd[b]) / (2.0 * step);
            }
        }
        for a in 0..k {
            for b in 0..a {
                let avg = 0.5 * (h[a][b] + h[b][a]);
                h[a][b] = avg;
                h[b][a] = avg;
            }
        }
        h
    }
}

fn ordinal_logit(sample: &Prepared) -> Result<Fit> {
    let model = Ordinal::new(sample)?;
    let n = sample.n();
    let k = model.n_params();
    check_df(n, k)?;

    let mut phi = model.start();
    let mut ll = model.log_likelihood(&phi);
    let mut iterations = 0;
    let mut converged = false;
    while iterations < NEWTON_MAX_ITER {
        iterations += 1;
        let g = model.gradient(&phi);
        let h = model.hessian(&phi);
        let neg: Matrix = h.iter().map(|r| r.iter().map(|v| -v).collect()).collect();
        let direction = mat_vec(&invert(&neg)?, &g);

        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_HALVINGS {
            let trial: Vec<f64> = phi.iter().zip(&direction).map(|(p, d)| p + scale * d).collect();
            let trial_ll = model.log_likelihood(&trial);
            if trial_ll.is_finite() && trial_ll >= ll - 1e-12 {
                accepted = Some((trial, trial_ll));
                break;
            }
            scale *= 0.5;
        }
        let Some((next, next_ll)) = accepted else {
            break;
        };
        let change = next
            .iter()
            .zip(&phi)
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
        phi = next;
        let gain = next_ll - ll;
        ll = next_ll;
        if change < TOLERANCE || gain.abs() < 1e-10 {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(Error::NumericallyDegenerate(format!(
            "ordinal logit for '{}' did not converge in {} iterations",
            sample.outcome, iterations
        )));
    }

    let info: Matrix = model
        .hessian(&phi)
        .iter()
        .map(|r| r.iter().map(|v| -v).collect())
        .collect();
    let bread = invert(&info)?;
    let (v, variance_kind) = match &sample.weights {
        Some(weights) => {
            let scores: Vec<Vec<f64>> = (0..n)
                .map(|i| model.score(&phi, i).into_iter().map(|s| weights[i] * s).collect())
                .collect();
            (sandwich(&bread, &scores, n, k), "hc1")
        }
        None => (bread, "model"),
    };

    let focal = model.n_cuts;
    Ok(Fit {
        estimate: phi[focal],
        variance: v[focal][focal],
        n,
        diagnostics: vec![
            ("variance".into(), variance_kind.into()),
            ("odds_ratio".into(), format!("{:.4}", phi[focal].exp())),
            ("levels".into(), (model.n_cuts + 1).to_string()),
            ("iterations".into(), iterations.to_string()),
        ],
    })
}
