//! Drift alert types and severity levels.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a drift alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DriftSeverity {
    Info,
    /// The share of missing cells is above the configured limit.
    Warning,
    /// Prediction or dataset drift was detected.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriftAlertKind {
    /// The prediction distribution moved away from the reference.
    PredictionDrift {
        day: NaiveDate,
        stat_test: String,
        score: f64,
        threshold: f64,
    },
    /// Enough columns drifted to flag the whole dataset.
    DatasetDrift {
        day: NaiveDate,
        drifted_columns: usize,
        share: f64,
    },
    /// Too many missing cells in the day's data.
    MissingValues { day: NaiveDate, share: f64, limit: f64 },
    Custom { name: String, message: String },
}

/// A single alert emitted by the daily monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: DriftSeverity,
    pub kind: DriftAlertKind,
    pub message: String,
    pub acknowledged: bool,
}

impl DriftAlert {
    pub fn new(severity: DriftSeverity, kind: DriftAlertKind, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            kind,
            message,
            acknowledged: false,
        }
    }
}
