//! Trip, prediction and monitoring row types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which taxi service a trip partition comes from. The services publish the
/// same trips with differently prefixed timestamp columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxiService {
    Green,
    Yellow,
}

impl TaxiService {
    pub fn pickup_column(&self) -> &'static str {
        match self {
            Self::Green => "lpep_pickup_datetime",
            Self::Yellow => "tpep_pickup_datetime",
        }
    }

    pub fn dropoff_column(&self) -> &'static str {
        match self {
            Self::Green => "lpep_dropoff_datetime",
            Self::Yellow => "tpep_dropoff_datetime",
        }
    }
}

impl std::str::FromStr for TaxiService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "green" => Ok(Self::Green),
            "yellow" => Ok(Self::Yellow),
            other => Err(format!("unknown taxi service: {other}")),
        }
    }
}

impl std::fmt::Display for TaxiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
        }
    }
}

pub const PICKUP_LOCATION: &str = "PULocationID";
pub const DROPOFF_LOCATION: &str = "DOLocationID";

/// Minimum and maximum trip duration in minutes kept for training and scoring.
pub const MIN_DURATION_MINUTES: f64 = 1.0;
pub const MAX_DURATION_MINUTES: f64 = 60.0;

/// Duration in minutes between two timestamps.
pub fn duration_minutes(pickup: NaiveDateTime, dropoff: NaiveDateTime) -> f64 {
    (dropoff - pickup).num_milliseconds() as f64 / 60_000.0
}

/// Whether a duration lies in the plausible [1, 60] minute range.
pub fn is_plausible_duration(minutes: f64) -> bool {
    (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes)
}

/// One output row of the batch scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub ride_id: String,
    pub predicted_duration: f64,
}

/// One row of the drift metrics table, one per monitored day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub timestamp: DateTime<Utc>,
    pub prediction_drift: f64,
    pub num_drifted_columns: i64,
    pub share_missing_values: f64,
    pub fare_amount_quantile: f64,
    pub trip_distance_quantile: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        assert_eq!(duration_minutes(at(1, 1, 0), at(1, 10, 0)), 9.0);
        assert!(is_plausible_duration(1.0));
        assert!(is_plausible_duration(60.0));
        assert!(!is_plausible_duration(59.0 / 60.0));
        assert!(!is_plausible_duration(duration_minutes(at(1, 2, 0), at(2, 2, 1))));
    }

    #[test]
    fn service_columns() {
        let svc: TaxiService = "Yellow".parse().unwrap();
        assert_eq!(svc.pickup_column(), "tpep_pickup_datetime");
        assert_eq!(TaxiService::Green.dropoff_column(), "lpep_dropoff_datetime");
        assert!("blue".parse::<TaxiService>().is_err());
    }
}
