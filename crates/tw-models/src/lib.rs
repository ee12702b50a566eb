//! # tw-models
//!
//! Regression models used across TripWise: a bagged regression forest for the
//! hyperparameter search and promotion, ordinary least squares for the batch
//! and monitoring models, plus the dictionary vectorizer that turns trip
//! features into sparse rows.

pub mod bundle;
pub mod forest;
pub mod linear;
pub mod metrics;
pub mod tree;
pub mod vectorizer;

pub use bundle::ModelBundle;
pub use forest::{ForestParams, RandomForestRegressor};
pub use linear::LinearRegression;
pub use metrics::{mean, rmse, std_dev};
pub use vectorizer::{DictVectorizer, FeatureDict, FeatureValue};

use serde::{Deserialize, Serialize};
use tw_types::{FeatureMatrix, TwResult};

/// Common interface for fit/predict regressors.
pub trait Regressor {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> TwResult<()>;

    fn predict(&self, x: &FeatureMatrix) -> TwResult<Vec<f64>>;

    /// Short model family name used in logs and run tags.
    fn name(&self) -> &str;
}

/// Serializable model of any supported family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    RandomForest(RandomForestRegressor),
    Linear(LinearRegression),
}

impl Regressor for Model {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> TwResult<()> {
        match self {
            Self::RandomForest(m) => m.fit(x, y),
            Self::Linear(m) => m.fit(x, y),
        }
    }

    fn predict(&self, x: &FeatureMatrix) -> TwResult<Vec<f64>> {
        match self {
            Self::RandomForest(m) => m.predict(x),
            Self::Linear(m) => m.predict(x),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::RandomForest(m) => m.name(),
            Self::Linear(m) => m.name(),
        }
    }
}

/// Fit a model on a training set and return its RMSE on an evaluation set.
pub fn fit_and_score<R: Regressor>(
    model: &mut R,
    train: (&FeatureMatrix, &[f64]),
    eval: (&FeatureMatrix, &[f64]),
) -> TwResult<f64> {
    model.fit(train.0, train.1)?;
    let pred = model.predict(eval.0)?;
    rmse(eval.1, &pred)
}
