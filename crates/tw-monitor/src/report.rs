//! Drift report comparing a current window against the reference dataset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use tw_data::TripFrame;
use tw_types::{MetricsRow, MonitorError, TwResult};

use crate::stats;

pub const PREDICTION_COLUMN: &str = "prediction";
pub const FARE_AMOUNT: &str = "fare_amount";
pub const TRIP_DISTANCE: &str = "trip_distance";

/// Columns with at most this many distinct reference values are compared as
/// categories even when declared numerical.
const MAX_NUMERIC_AS_CATEGORY: usize = 5;
const P_VALUE_THRESHOLD: f64 = 0.05;
const DISTANCE_THRESHOLD: f64 = 0.1;
const DATASET_DRIFT_SHARE: f64 = 0.5;

/// Which columns to compare and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub prediction: Option<String>,
    pub numerical_features: Vec<String>,
    pub categorical_features: Vec<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            prediction: Some(PREDICTION_COLUMN.to_string()),
            numerical_features: ["passenger_count", "trip_distance", "fare_amount", "total_amount"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            categorical_features: ["PULocationID", "DOLocationID"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ColumnMapping {
    /// Model input columns, numerical first.
    pub fn feature_columns(&self) -> Vec<String> {
        self.numerical_features
            .iter()
            .chain(self.categorical_features.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatTest {
    KolmogorovSmirnov,
    Wasserstein,
    ChiSquare,
    JensenShannon,
}

impl StatTest {
    /// Whether the score is a p-value (drift when small) rather than a distance.
    pub fn is_p_value(&self) -> bool {
        matches!(self, StatTest::KolmogorovSmirnov | StatTest::ChiSquare)
    }

    fn select(categorical: bool, n_reference: usize) -> Self {
        match (categorical, n_reference > stats::LARGE_SAMPLE) {
            (false, false) => StatTest::KolmogorovSmirnov,
            (false, true) => StatTest::Wasserstein,
            (true, false) => StatTest::ChiSquare,
            (true, true) => StatTest::JensenShannon,
        }
    }

    fn score(&self, reference: &[f64], current: &[f64]) -> f64 {
        match self {
            StatTest::KolmogorovSmirnov => stats::ks_2samp(reference, current).1,
            StatTest::Wasserstein => stats::normed_wasserstein(reference, current),
            StatTest::ChiSquare => stats::chi_square_p_value(reference, current),
            StatTest::JensenShannon => stats::jensen_shannon_distance(reference, current),
        }
    }
}

impl fmt::Display for StatTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatTest::KolmogorovSmirnov => "ks",
            StatTest::Wasserstein => "wasserstein",
            StatTest::ChiSquare => "chisquare",
            StatTest::JensenShannon => "jensenshannon",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub stat_test: StatTest,
    pub score: f64,
    pub threshold: f64,
    pub drift_detected: bool,
}

impl ColumnDrift {
    fn compute(column: &str, reference: &[f64], current: &[f64], declared_categorical: bool) -> Self {
        let categorical = declared_categorical || stats::n_unique(reference) <= MAX_NUMERIC_AS_CATEGORY;
        let stat_test = StatTest::select(categorical, reference.len());
        let score = stat_test.score(reference, current);
        let (threshold, drift_detected) = if stat_test.is_p_value() {
            (P_VALUE_THRESHOLD, score < P_VALUE_THRESHOLD)
        } else {
            (DISTANCE_THRESHOLD, score >= DISTANCE_THRESHOLD)
        };
        Self {
            column: column.to_string(),
            stat_test,
            score,
            threshold,
            drift_detected,
        }
    }
}

/// Drift, missing values and quantiles of one current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub prediction: Option<ColumnDrift>,
    /// Per-column results: numerical, then categorical, then prediction.
    pub columns: Vec<ColumnDrift>,
    pub number_of_drifted_columns: usize,
    pub share_of_drifted_columns: f64,
    pub dataset_drift: bool,
    pub share_missing_values: f64,
    /// Median of each quantile column over the current window.
    pub quantiles: BTreeMap<String, f64>,
}

fn present(frame: &TripFrame, column: &str, dataset: &str) -> TwResult<Vec<f64>> {
    if !frame.has_column(column) {
        return Err(MonitorError::MissingColumn {
            column: column.to_string(),
            dataset: dataset.to_string(),
        }
        .into());
    }
    Ok(frame.numeric(column)?.iter().flatten().copied().collect())
}

impl DriftReport {
    pub fn run(
        reference: &TripFrame,
        current: &TripFrame,
        mapping: &ColumnMapping,
        quantile_columns: &[(String, f64)],
    ) -> TwResult<Self> {
        if reference.is_empty() {
            return Err(MonitorError::EmptyReference.into());
        }

        let declared = mapping
            .numerical_features
            .iter()
            .map(|c| (c.as_str(), false))
            .chain(mapping.categorical_features.iter().map(|c| (c.as_str(), true)))
            .chain(mapping.prediction.iter().map(|c| (c.as_str(), false)));

        let mut columns = Vec::new();
        for (column, categorical) in declared {
            let ref_values = present(reference, column, "reference")?;
            let cur_values = present(current, column, "current")?;
            columns.push(ColumnDrift::compute(column, &ref_values, &cur_values, categorical));
        }

        let prediction = mapping
            .prediction
            .as_ref()
            .and_then(|name| columns.iter().find(|c| &c.column == name))
            .cloned();

        let number_of_drifted_columns = columns.iter().filter(|c| c.drift_detected).count();
        let share_of_drifted_columns = if columns.is_empty() {
            0.0
        } else {
            number_of_drifted_columns as f64 / columns.len() as f64
        };

        let cells = current.n_rows() * current.n_columns();
        let share_missing_values = if cells == 0 {
            0.0
        } else {
            current.missing_cells() as f64 / cells as f64
        };

        let mut quantiles = BTreeMap::new();
        for (column, q) in quantile_columns {
            let values = present(current, column, "current")?;
            quantiles.insert(column.clone(), stats::quantile(&values, *q));
        }

        Ok(Self {
            prediction,
            columns,
            number_of_drifted_columns,
            share_of_drifted_columns,
            dataset_drift: share_of_drifted_columns >= DATASET_DRIFT_SHARE,
            share_missing_values,
            quantiles,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDrift> {
        self.columns.iter().find(|c| c.column == name)
    }

    /// Row for the metrics table.
    pub fn metrics_row(&self, timestamp: DateTime<Utc>) -> MetricsRow {
        MetricsRow {
            timestamp,
            prediction_drift: self.prediction.as_ref().map_or(f64::NAN, |p| p.score),
            num_drifted_columns: self.number_of_drifted_columns as i64,
            share_missing_values: self.share_missing_values,
            fare_amount_quantile: self.quantiles.get(FARE_AMOUNT).copied().unwrap_or(f64::NAN),
            trip_distance_quantile: self.quantiles.get(TRIP_DISTANCE).copied().unwrap_or(f64::NAN),
        }
    }
}
