//! Chained-equations back-end with predictive mean matching
//!
//! **Algorithm** (one completion, one RNG stream):
//! 1. initialise every missing cell with a hot-deck draw
//! 2. run `burn_in` passes plus one final pass; each pass updates every
//!    incomplete column in frame order
//! 3. numeric and ordinal columns: ridge-stabilised linear model on the other
//!    numeric columns, coefficients re-fitted on a bootstrap resample of the
//!    observed rows, then each missing cell takes a random donor among the
//!    [`PMM_DONORS`] observed rows whose fitted value is closest. Ordinal
//!    columns stay on their observed levels because donors are observed rows.
//! 4. categorical columns: nearest-neighbour donors. The other numeric
//!    columns are standardised and each missing cell takes a random donor
//!    among the [`PMM_DONORS`] observed rows closest in that space, so the
//!    drawn category follows the predictors
//! 5. columns without usable predictors: marginal hot-deck draw
//!
//! Donors are observed rows, so imputations only ever take values the column
//! actually exhibits.

use crate::engine::Imputer;
use crate::frame::{identity_donors, Donors, Frame};
use crate::hot_deck::draw_donors;
use cbp_common::config::ImputationBackend;
use cbp_common::linalg::{self, Matrix};
use cbp_common::{stats, Result};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

/// Donor pool size for predictive mean matching
pub const PMM_DONORS: usize = 5;

/// Relative ridge added to the slope diagonal
const RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct Chained {
    pub burn_in: usize,
}

impl Chained {
    pub fn new(burn_in: usize) -> Self {
        Self { burn_in }
    }
}

impl Imputer for Chained {
    fn backend(&self) -> ImputationBackend {
        ImputationBackend::Chained
    }

    fn complete(&self, frame: &Frame, rng: &mut StdRng) -> Result<Donors> {
        let mut donors = identity_donors(frame);
        for (column, column_donors) in frame.columns.iter().zip(donors.iter_mut()) {
            draw_donors(column, column_donors, rng);
        }

        for pass in 0..=self.burn_in {
            for (j, column) in frame.columns.iter().enumerate() {
                if column.n_missing() == 0 {
                    continue;
                }
                let updated = if column.kind.is_numeric() {
                    pmm_update(frame, &donors, j, rng)?
                } else {
                    neighbour_update(frame, &donors, j, rng)
                };
                match updated {
                    Some(next) => donors[j] = next,
                    None => draw_donors(column, &mut donors[j], rng),
                }
            }
            debug!(pass, final_pass = pass == self.burn_in, "Chained pass complete");
        }
        Ok(donors)
    }
}

fn design_matrix(frame: &Frame, donors: &Donors, predictors: &[usize]) -> Matrix {
    (0..frame.n_rows)
        .map(|i| {
            let mut row = Vec::with_capacity(predictors.len() + 1);
            row.push(1.0);
            for &c in predictors {
                row.push(frame.columns[c].numeric[donors[c][i]].unwrap_or(0.0));
            }
            row
        })
        .collect()
}

fn fit(x: &Matrix, y: &[Option<f64>], rows: &[usize]) -> Result<Vec<f64>> {
    let xs: Matrix = rows.iter().map(|&i| x[i].clone()).collect();
    let ys: Vec<f64> = rows.iter().map(|&i| y[i].unwrap_or(0.0)).collect();
    let mut a = linalg::xtwx(&xs, None);
    for k in 1..a.len() {
        a[k][k] += RIDGE * a[k][k].abs().max(1.0);
    }
    linalg::solve(&a, &linalg::xtwy(&xs, &ys, None))
}

/// PMM update of column `j`; `None` asks the caller to fall back to hot-deck
fn pmm_update(frame: &Frame, donors: &Donors, j: usize, rng: &mut StdRng) -> Result<Option<Vec<usize>>> {
    let target = &frame.columns[j];
    let predictors: Vec<usize> = (0..frame.columns.len())
        .filter(|&c| c != j && frame.columns[c].kind.is_numeric())
        .collect();
    let observed = target.observed_rows();
    if predictors.is_empty() || observed.len() <= predictors.len() + 1 {
        return Ok(None);
    }

    let x = design_matrix(frame, donors, &predictors);
    let beta_hat = match fit(&x, &target.numeric, &observed) {
        Ok(beta) => beta,
        Err(e) if e.is_degenerate() => {
            debug!(column = %target.name, "Singular PMM fit, using hot-deck");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let resample: Vec<usize> = (0..observed.len())
        .map(|_| observed[rng.gen_range(0..observed.len())])
        .collect();
    let beta_star = match fit(&x, &target.numeric, &resample) {
        Ok(beta) => beta,
        Err(e) if e.is_degenerate() => beta_hat.clone(),
        Err(e) => return Err(e),
    };

    let mut fitted: Vec<(f64, usize)> = observed
        .iter()
        .map(|&d| (linalg::dot(&x[d], &beta_hat), d))
        .collect();
    fitted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut next = donors[j].clone();
    for row in target.missing_rows() {
        let pool = nearest(&fitted, linalg::dot(&x[row], &beta_star), PMM_DONORS);
        if !pool.is_empty() {
            next[row] = pool[rng.gen_range(0..pool.len())];
        }
    }
    Ok(Some(next))
}

/// Numeric predictors of column `j` under the current completion,
/// standardised to mean 0 and unit variance; constant columns are dropped
fn standardised_predictors(frame: &Frame, donors: &Donors, j: usize) -> Vec<Vec<f64>> {
    (0..frame.columns.len())
        .filter(|&c| c != j && frame.columns[c].kind.is_numeric())
        .filter_map(|c| {
            let values: Vec<Option<f64>> = (0..frame.n_rows)
                .map(|i| frame.columns[c].numeric[donors[c][i]])
                .collect();
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            let mean = stats::mean(&present)?;
            let sd = stats::population_sd(&present).filter(|s| *s > 0.0)?;
            Some(values.iter().map(|v| v.map(|x| (x - mean) / sd).unwrap_or(0.0)).collect())
        })
        .collect()
}

/// Nearest-neighbour update of categorical column `j`; `None` falls back to hot-deck
fn neighbour_update(frame: &Frame, donors: &Donors, j: usize, rng: &mut StdRng) -> Option<Vec<usize>> {
    let target = &frame.columns[j];
    let observed = target.observed_rows();
    let predictors = standardised_predictors(frame, donors, j);
    if predictors.is_empty() || observed.is_empty() {
        return None;
    }

    let mut next = donors[j].clone();
    for row in target.missing_rows() {
        let mut distances: Vec<(f64, usize)> = observed
            .iter()
            .map(|&d| {
                let dist = predictors.iter().map(|p| (p[d] - p[row]).powi(2)).sum::<f64>();
                (dist, d)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let pool = &distances[..PMM_DONORS.min(distances.len())];
        next[row] = pool[rng.gen_range(0..pool.len())].1;
    }
    debug!(column = %target.name, predictors = predictors.len(), "Nearest-neighbour update");
    Some(next)
}

/// Rows of the `k` fitted values closest to `target` (ties prefer the lower side)
pub fn nearest(sorted: &[(f64, usize)], target: f64, k: usize) -> Vec<usize> {
    let k = k.min(sorted.len());
    let mut hi = sorted.partition_point(|(v, _)| *v < target);
    let mut lo = hi;
    let mut out = Vec::with_capacity(k);
    while out.len() < k {
        let left = lo.checked_sub(1).map(|l| (target - sorted[l].0, l));
        let right = (hi < sorted.len()).then(|| (sorted[hi].0 - target, hi));
        match (left, right) {
            (Some((dl, l)), Some((dr, _))) if dl <= dr => {
                out.push(sorted[l].1);
                lo = l;
            }
            (Some((_, l)), None) => {
                out.push(sorted[l].1);
                lo = l;
            }
            (_, Some((_, r))) => {
                out.push(sorted[r].1);
                hi = r + 1;
            }
            (None, None) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameColumn, VarKind};
    use rand::SeedableRng;

    fn numeric_column(name: &str, values: &[Option<f64>]) -> FrameColumn {
        FrameColumn {
            name: name.to_string(),
            kind: VarKind::Numeric,
            raw: values
                .iter()
                .map(|v| v.map(|x| x.to_string()).unwrap_or_default())
                .collect(),
            observed: values.iter().map(|v| v.is_some()).collect(),
            numeric: values.to_vec(),
        }
    }

    fn categorical_column(name: &str, values: &[Option<&str>]) -> FrameColumn {
        FrameColumn {
            name: name.to_string(),
            kind: VarKind::Categorical,
            raw: values.iter().map(|v| v.unwrap_or("").to_string()).collect(),
            observed: values.iter().map(|v| v.is_some()).collect(),
            numeric: vec![None; values.len()],
        }
    }

    /// `band` is "low" below x = 20 and "high" from 20; every fifth band missing
    fn banded_frame() -> Frame {
        let x: Vec<Option<f64>> = (0..40).map(|i| Some(i as f64)).collect();
        let band: Vec<Option<&str>> = (0..40)
            .map(|i| match (i % 5, i < 20) {
                (0, _) => None,
                (_, true) => Some("low"),
                (_, false) => Some("high"),
            })
            .collect();
        Frame {
            n_rows: 40,
            columns: vec![numeric_column("x", &x), categorical_column("band", &band)],
        }
    }

    fn correlated_frame() -> Frame {
        let x: Vec<Option<f64>> = (0..20).map(|i| Some(i as f64)).collect();
        let y: Vec<Option<f64>> = (0..20)
            .map(|i| if i % 4 == 1 { None } else { Some(2.0 * i as f64 + 1.0) })
            .collect();
        Frame {
            n_rows: 20,
            columns: vec![numeric_column("x", &x), numeric_column("y", &y)],
        }
    }

    #[test]
    fn test_nearest_picks_closest_rows() {
        let sorted = vec![(1.0, 10), (2.0, 11), (4.0, 12), (8.0, 13)];
        assert_eq!(nearest(&sorted, 3.9, 2), vec![12, 11]);
        assert_eq!(nearest(&sorted, -5.0, 2), vec![10, 11]);
        assert_eq!(nearest(&sorted, 100.0, 9), vec![13, 12, 11, 10]);
        assert!(nearest(&[], 1.0, 5).is_empty());
    }

    #[test]
    fn test_donors_are_observed_rows_and_observed_cells_stay() {
        let frame = correlated_frame();
        let mut rng = StdRng::seed_from_u64(20251017);
        let donors = Chained::new(3).complete(&frame, &mut rng).unwrap();
        let y = &frame.columns[1];
        for row in 0..20 {
            if y.observed[row] {
                assert_eq!(donors[1][row], row);
            } else {
                assert!(y.observed[donors[1][row]]);
            }
        }
    }

    #[test]
    fn test_pmm_tracks_the_predictor() {
        let frame = correlated_frame();
        let mut rng = StdRng::seed_from_u64(1);
        let donors = Chained::new(2).complete(&frame, &mut rng).unwrap();
        for row in frame.columns[1].missing_rows() {
            let donor = donors[1][row];
            // Five nearest fitted values sit within a few rows of the target
            assert!((donor as i64 - row as i64).abs() <= 7, "row {} took donor {}", row, donor);
        }
    }

    #[test]
    fn test_categorical_draws_follow_the_predictor() {
        let frame = banded_frame();
        let band = &frame.columns[1];
        for seed in [1, 7, 20251016] {
            let donors = Chained::new(2).complete(&frame, &mut StdRng::seed_from_u64(seed)).unwrap();
            for row in band.missing_rows() {
                let drawn = band.raw[donors[1][row]].as_str();
                match row {
                    0..=15 => assert_eq!(drawn, "low", "seed {} row {}", seed, row),
                    25.. => assert_eq!(drawn, "high", "seed {} row {}", seed, row),
                    _ => assert!(band.observed[donors[1][row]]),
                }
            }
        }
    }

    #[test]
    fn test_categorical_without_numeric_predictors_uses_hot_deck() {
        let frame = Frame {
            n_rows: 4,
            columns: vec![categorical_column("city", &[Some("Oslo"), None, Some("Lima"), None])],
        };
        let donors = Chained::new(1).complete(&frame, &mut StdRng::seed_from_u64(3)).unwrap();
        assert!([0, 2].contains(&donors[0][1]));
        assert!([0, 2].contains(&donors[0][3]));
    }

    #[test]
    fn test_same_stream_same_completion() {
        let frame = correlated_frame();
        let a = Chained::new(2).complete(&frame, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = Chained::new(2).complete(&frame, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
