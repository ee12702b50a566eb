//! Duration labelling and feature dictionaries for trip frames.

use tw_models::{FeatureDict, FeatureValue};
use tw_types::{duration_minutes, is_plausible_duration, TaxiService, TwResult, DROPOFF_LOCATION, PICKUP_LOCATION};

use crate::frame::TripFrame;

pub const TRIP_DISTANCE: &str = "trip_distance";
pub const PU_DO: &str = "PU_DO";

/// Trips kept after the duration filter.
#[derive(Debug, Clone)]
pub struct LabelledTrips {
    pub frame: TripFrame,
    /// Duration in minutes per kept row.
    pub durations: Vec<f64>,
    /// Row index of each kept row in the unfiltered input.
    pub source_rows: Vec<usize>,
}

impl LabelledTrips {
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

/// Derive trip durations and keep rows lasting between 1 and 60 minutes.
/// Rows missing either timestamp are dropped.
pub fn label_durations(frame: &TripFrame, service: TaxiService) -> TwResult<LabelledTrips> {
    let pickups = frame.timestamps(service.pickup_column())?;
    let dropoffs = frame.timestamps(service.dropoff_column())?;

    let mut source_rows = Vec::new();
    let mut durations = Vec::new();
    for (i, (pickup, dropoff)) in pickups.iter().zip(dropoffs).enumerate() {
        let (Some(pickup), Some(dropoff)) = (pickup, dropoff) else {
            continue;
        };
        let minutes = duration_minutes(*pickup, *dropoff);
        if is_plausible_duration(minutes) {
            source_rows.push(i);
            durations.push(minutes);
        }
    }

    tracing::debug!(
        "Kept {} of {} trips within the duration window",
        source_rows.len(),
        frame.n_rows()
    );
    Ok(LabelledTrips {
        frame: frame.select_rows(&source_rows),
        durations,
        source_rows,
    })
}

/// `"{year:04}/{month:02}_{row}"` per source row index.
pub fn ride_ids(year: i32, month: u32, source_rows: &[usize]) -> Vec<String> {
    source_rows
        .iter()
        .map(|row| format!("{year:04}/{month:02}_{row}"))
        .collect()
}

/// Location id rendered as an integer string, `-1` when missing.
pub fn location_label(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}", v as i64),
        _ => "-1".to_string(),
    }
}

/// One-hot pickup and dropoff locations, as scored by the batch model.
pub fn location_dicts(frame: &TripFrame) -> TwResult<Vec<FeatureDict>> {
    let pickups = frame.numeric(PICKUP_LOCATION)?;
    let dropoffs = frame.numeric(DROPOFF_LOCATION)?;
    Ok(pickups
        .iter()
        .zip(dropoffs)
        .map(|(pu, dol)| {
            let mut dict = FeatureDict::new();
            dict.insert(PICKUP_LOCATION.to_string(), location_label(*pu).into());
            dict.insert(DROPOFF_LOCATION.to_string(), location_label(*dol).into());
            dict
        })
        .collect())
}

/// Combined `PU_DO` category plus numeric `trip_distance`.
pub fn route_dict(pickup: Option<f64>, dropoff: Option<f64>, trip_distance: Option<f64>) -> FeatureDict {
    let mut dict = FeatureDict::new();
    dict.insert(
        PU_DO.to_string(),
        format!("{}_{}", location_label(pickup), location_label(dropoff)).into(),
    );
    if let Some(distance) = trip_distance.filter(|d| d.is_finite()) {
        dict.insert(TRIP_DISTANCE.to_string(), FeatureValue::Num(distance));
    }
    dict
}

pub fn route_dicts(frame: &TripFrame) -> TwResult<Vec<FeatureDict>> {
    let pickups = frame.numeric(PICKUP_LOCATION)?;
    let dropoffs = frame.numeric(DROPOFF_LOCATION)?;
    let distances = frame.numeric(TRIP_DISTANCE)?;
    Ok((0..frame.n_rows())
        .map(|i| route_dict(pickups[i], dropoffs[i], distances[i]))
        .collect())
}

/// Numeric dictionaries over `columns`, missing values filled with zero.
pub fn numeric_dicts(frame: &TripFrame, columns: &[String]) -> TwResult<Vec<FeatureDict>> {
    let cols = columns
        .iter()
        .map(|name| -> TwResult<(&str, &[Option<f64>])> { Ok((name.as_str(), frame.numeric(name)?)) })
        .collect::<TwResult<Vec<_>>>()?;
    Ok((0..frame.n_rows())
        .map(|i| {
            cols.iter()
                .map(|(name, values)| (name.to_string(), FeatureValue::Num(values[i].unwrap_or(0.0))))
                .collect()
        })
        .collect())
}
