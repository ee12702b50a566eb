//! Regression metrics.

use tw_types::{ModelError, TwResult};

/// Root mean squared error between observed and predicted values.
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> TwResult<f64> {
    if y_true.len() != y_pred.len() {
        return Err(ModelError::ShapeMismatch {
            what: "predictions".to_string(),
            expected: y_true.len(),
            actual: y_pred.len(),
        }
        .into());
    }
    if y_true.is_empty() {
        return Err(ModelError::EmptyTrainingSet.into());
    }
    let sse: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    Ok((sse / y_true.len() as f64).sqrt())
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}
