//! Bagged ensemble of regression trees.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tw_types::{FeatureMatrix, ModelError, TwResult};

use crate::tree::{RegressionTree, TreeParams};
use crate::Regressor;

/// Forest hyperparameters. Defaults follow the usual random-forest defaults:
/// 100 fully grown bootstrapped trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    /// Seed for the bootstrap draws. `None` draws a fresh seed at fit time.
    pub random_state: Option<u64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            random_state: None,
        }
    }
}

impl ForestParams {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> TwResult<()> {
        let invalid = |name: &str, message: &str| -> TwResult<()> {
            Err(ModelError::InvalidHyperparameter {
                name: name.to_string(),
                message: message.to_string(),
            }
            .into())
        };
        if self.n_estimators == 0 {
            return invalid("n_estimators", "must be at least 1");
        }
        if self.max_depth == Some(0) {
            return invalid("max_depth", "must be at least 1");
        }
        if self.min_samples_split < 2 {
            return invalid("min_samples_split", "must be at least 2");
        }
        if self.min_samples_leaf == 0 {
            return invalid("min_samples_leaf", "must be at least 1");
        }
        Ok(())
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub params: ForestParams,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> TwResult<()> {
        self.params.validate()?;
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

        let seed = self.params.random_state.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tree_params = self.params.tree_params();
        let n = x.n_rows();

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for t in 0..self.params.n_estimators {
            let samples: Vec<usize> = if self.params.bootstrap {
                (0..n).map(|_| rng.random_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let tree = RegressionTree::fit(x, y, samples, &tree_params)?;
            debug!(tree = t, nodes = tree.node_count(), "fitted tree");
            trees.push(tree);
        }
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> TwResult<Vec<f64>> {
        let first = self.trees.first().ok_or(ModelError::NotFitted)?;
        if x.n_cols() != first.n_features() {
            return Err(ModelError::ShapeMismatch {
                what: "features".to_string(),
                expected: first.n_features(),
                actual: x.n_cols(),
            }
            .into());
        }
        let k = self.trees.len() as f64;
        Ok(x.rows()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / k)
            .collect())
    }

    fn name(&self) -> &str {
        "random_forest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::rmse;

    fn noisy_line(n: usize) -> (FeatureMatrix, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y = (0..n).map(|i| 2.0 * i as f64 + (i % 3) as f64).collect();
        (FeatureMatrix::from_dense(&rows).unwrap(), y)
    }

    #[test]
    fn seeded_forest_is_deterministic() {
        let (x, y) = noisy_line(60);
        let params = ForestParams::default()
            .with_n_estimators(10)
            .with_max_depth(6)
            .with_random_state(42);

        let mut a = RandomForestRegressor::new(params.clone());
        let mut b = RandomForestRegressor::new(params);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
        assert_eq!(a.n_trees(), 10);
    }

    #[test]
    fn forest_fits_training_data_reasonably() {
        let (x, y) = noisy_line(80);
        let mut forest = RandomForestRegressor::new(
            ForestParams::default()
                .with_n_estimators(20)
                .with_random_state(7),
        );
        forest.fit(&x, &y).unwrap();
        let pred = forest.predict(&x).unwrap();
        let error = rmse(&y, &pred).unwrap();
        assert!(error.is_finite() && error >= 0.0);
        assert!(error < 10.0, "training rmse too high: {error}");
    }

    #[test]
    fn unfitted_forest_refuses_to_predict() {
        let (x, _) = noisy_line(5);
        let forest = RandomForestRegressor::new(ForestParams::default());
        assert!(forest.predict(&x).is_err());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let (x, y) = noisy_line(5);
        let mut forest =
            RandomForestRegressor::new(ForestParams::default().with_min_samples_split(1));
        assert!(forest.fit(&x, &y).is_err());

        let mut forest = RandomForestRegressor::new(ForestParams::default().with_n_estimators(0));
        assert!(forest.fit(&x, &y).is_err());
    }

    #[test]
    fn feature_count_mismatch_is_rejected() {
        let (x, y) = noisy_line(20);
        let mut forest = RandomForestRegressor::new(
            ForestParams::default()
                .with_n_estimators(2)
                .with_random_state(1),
        );
        forest.fit(&x, &y).unwrap();
        let narrow = FeatureMatrix::from_dense(&[vec![1.0]]).unwrap();
        assert!(forest.predict(&narrow).is_err());
    }
}
