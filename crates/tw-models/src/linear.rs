//! Ordinary least squares with an intercept, solved through the normal
//! equations. A tiny ridge term keeps one-hot designs (which are collinear
//! with the intercept) positive definite.

use serde::{Deserialize, Serialize};

use tw_types::{FeatureMatrix, ModelError, TwResult};

use crate::Regressor;

const DEFAULT_RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub ridge: f64,
    fitted: bool,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            coefficients: Vec::new(),
            intercept: 0.0,
            ridge: DEFAULT_RIDGE,
            fitted: false,
        }
    }

    /// Model with known weights, for scoring without a training step.
    pub fn from_weights(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
            ridge: DEFAULT_RIDGE,
            fitted: true,
        }
    }

    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> TwResult<()> {
        if x.is_empty() {
            return Err(ModelError::EmptyTrainingSet.into());
        }
        if x.n_rows() != y.len() {
            return Err(ModelError::ShapeMismatch {
                what: "targets".to_string(),
                expected: x.n_rows(),
                actual: y.len(),
            }
            .into());
        }

        // Design is [X | 1]; the intercept sits in the last slot.
        let d = x.n_cols() + 1;
        let bias = d - 1;
        let mut gram = vec![0.0; d * d];
        let mut rhs = vec![0.0; d];

        for (row, &target) in x.rows().zip(y) {
            let entries: Vec<(usize, f64)> = row.iter().chain(std::iter::once((bias, 1.0))).collect();
            for &(i, vi) in &entries {
                rhs[i] += vi * target;
                for &(j, vj) in &entries {
                    gram[i * d + j] += vi * vj;
                }
            }
        }
        for i in 0..bias {
            gram[i * d + i] += self.ridge;
        }

        let weights = solve_cholesky(&mut gram, &rhs, d)?;
        self.intercept = weights[bias];
        self.coefficients = weights[..bias].to_vec();
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> TwResult<Vec<f64>> {
        if !self.fitted {
            return Err(ModelError::NotFitted.into());
        }
        if x.n_cols() != self.coefficients.len() {
            return Err(ModelError::ShapeMismatch {
                what: "features".to_string(),
                expected: self.coefficients.len(),
                actual: x.n_cols(),
            }
            .into());
        }
        Ok(x.rows()
            .map(|row| row.dot(&self.coefficients) + self.intercept)
            .collect())
    }

    fn name(&self) -> &str {
        "linear_regression"
    }
}

/// Solve `A w = b` for symmetric positive definite `A` (row-major, `d × d`).
/// `a` is overwritten with its Cholesky factor.
fn solve_cholesky(a: &mut [f64], b: &[f64], d: usize) -> TwResult<Vec<f64>> {
    for j in 0..d {
        let mut diag = a[j * d + j];
        for k in 0..j {
            diag -= a[j * d + k] * a[j * d + k];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return Err(ModelError::SingularSystem.into());
        }
        let diag = diag.sqrt();
        a[j * d + j] = diag;
        for i in (j + 1)..d {
            let mut v = a[i * d + j];
            for k in 0..j {
                v -= a[i * d + k] * a[j * d + k];
            }
            a[i * d + j] = v / diag;
        }
    }

    // L z = b
    let mut z = vec![0.0; d];
    for i in 0..d {
        let mut v = b[i];
        for k in 0..i {
            v -= a[i * d + k] * z[k];
        }
        z[i] = v / a[i * d + i];
    }
    // L^T w = z
    let mut w = vec![0.0; d];
    for i in (0..d).rev() {
        let mut v = z[i];
        for k in (i + 1)..d {
            v -= a[k * d + i] * w[k];
        }
        w[i] = v / a[i * d + i];
    }
    Ok(w)
}
