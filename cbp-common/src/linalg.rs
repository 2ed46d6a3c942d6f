//! Small dense linear algebra for the model routines
//!
//! Matrices are row-major `Vec<Vec<f64>>` of at most a few dozen columns
//! (one per regressor), so Gauss-Jordan elimination with partial pivoting is
//! sufficient and fully deterministic.

use crate::{Error, Result};

pub type Matrix = Vec<Vec<f64>>;

/// Pivot magnitude below which a matrix is treated as singular
const SINGULAR_EPS: f64 = 1e-10;

pub fn zeros(rows: usize, cols: usize) -> Matrix {
    vec![vec![0.0; cols]; rows]
}

pub fn identity(n: usize) -> Matrix {
    let mut m = zeros(n, n);
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

/// Invert a square matrix; `NumericallyDegenerate` when singular
pub fn invert(matrix: &Matrix) -> Result<Matrix> {
    let n = matrix.len();
    if matrix.iter().any(|r| r.len() != n) {
        return Err(Error::InvalidInput(format!("matrix is not square ({} rows)", n)));
    }
    let scale = matrix
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);
    let mut a = matrix.clone();
    let mut inv = identity(n);

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < SINGULAR_EPS * scale {
            return Err(Error::NumericallyDegenerate(format!(
                "singular design matrix (column {} has no usable pivot)",
                col
            )));
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Ok(inv)
}

/// `Xᵀ W X` for optional per-row weights
pub fn xtwx(x: &[Vec<f64>], weights: Option<&[f64]>) -> Matrix {
    let p = x.first().map(|r| r.len()).unwrap_or(0);
    let mut out = zeros(p, p);
    for (i, row) in x.iter().enumerate() {
        let w = weights.map(|w| w[i]).unwrap_or(1.0);
        for a in 0..p {
            let wa = w * row[a];
            for b in a..p {
                out[a][b] += wa * row[b];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            out[a][b] = out[b][a];
        }
    }
    out
}

/// `Xᵀ W y`
pub fn xtwy(x: &[Vec<f64>], y: &[f64], weights: Option<&[f64]>) -> Vec<f64> {
    let p = x.first().map(|r| r.len()).unwrap_or(0);
    let mut out = vec![0.0; p];
    for (i, row) in x.iter().enumerate() {
        let w = weights.map(|w| w[i]).unwrap_or(1.0);
        for (a, v) in row.iter().enumerate() {
            out[a] += w * v * y[i];
        }
    }
    out
}

pub fn mat_vec(m: &Matrix, v: &[f64]) -> Vec<f64> {
    m.iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

pub fn mat_mul(a: &Matrix, b: &Matrix) -> Matrix {
    let n = a.len();
    let k = b.len();
    let p = b.first().map(|r| r.len()).unwrap_or(0);
    let mut out = zeros(n, p);
    for i in 0..n {
        for l in 0..k {
            let ail = a[i][l];
            if ail == 0.0 {
                continue;
            }
            for j in 0..p {
                out[i][j] += ail * b[l][j];
            }
        }
    }
    out
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Solve `A x = b` through the inverse
pub fn solve(a: &Matrix, b: &[f64]) -> Result<Vec<f64>> {
    Ok(mat_vec(&invert(a)?, b))
}
