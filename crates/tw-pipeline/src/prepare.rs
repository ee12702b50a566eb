//! Feature preparation: three consecutive green-taxi months become the
//! train, validation and test splits.

use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::info;

use tw_data::{label_durations, route_dicts, ArtifactStore, Dataset, Split, TripFrame, TripLoader};
use tw_models::{DictVectorizer, FeatureDict};
use tw_types::{validation_error, TaxiService, TwResult};

pub const DEFAULT_START_YEAR: i32 = 2023;
pub const DEFAULT_START_MONTH: u32 = 1;

/// `{raw}/green_tripdata_{year}-{MM}.parquet`
pub fn month_file(raw_data_path: &Path, year: i32, month: u32) -> PathBuf {
    raw_data_path.join(format!("{}_tripdata_{year:04}-{month:02}.parquet", TaxiService::Green))
}

/// The month after `(year, month)`.
fn next_month(year: i32, month: u32) -> TwResult<(i32, u32)> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| validation_error!("invalid start month {}-{}", year, month))?;
    let next = date
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(|| validation_error!("month after {}-{} is out of range", year, month))?;
    Ok((next.year(), next.month()))
}

/// Train, validation and test months starting at `(year, month)`.
pub fn split_months(year: i32, month: u32) -> TwResult<[(Split, i32, u32); 3]> {
    let val = next_month(year, month)?;
    let test = next_month(val.0, val.1)?;
    Ok([
        (Split::Train, year, month),
        (Split::Val, val.0, val.1),
        (Split::Test, test.0, test.1),
    ])
}

/// Route features and durations of one month.
pub fn labelled_features(frame: &TripFrame) -> TwResult<(Vec<FeatureDict>, Vec<f64>)> {
    let service = frame.require_service()?;
    let trips = label_durations(frame, service)?;
    let dicts = route_dicts(&trips.frame)?;
    Ok((dicts, trips.durations))
}

#[derive(Debug, Clone)]
pub struct PrepareOutcome {
    pub rows: [(Split, usize); 3],
    pub n_features: usize,
}

/// Read the three months, fit the vectorizer on the training month and write
/// every split plus the vectorizer under `dest_path`.
pub async fn run_prepare(raw_data_path: &Path, dest_path: &Path, year: i32, month: u32) -> TwResult<PrepareOutcome> {
    let loader = TripLoader::new();
    let mut features = Vec::with_capacity(3);
    for (split, y, m) in split_months(year, month)? {
        let file = month_file(raw_data_path, y, m);
        let frame = loader.load_parquet_file(&file).await?;
        let (dicts, target) = labelled_features(&frame)?;
        info!("{:?} split from {}: {} trips", split, file.display(), target.len());
        features.push((split, dicts, target));
    }

    let mut vectorizer = DictVectorizer::new();
    if let Some((_, train_dicts, _)) = features.first() {
        vectorizer.fit(train_dicts);
    }
    if vectorizer.n_features() == 0 {
        return Err(validation_error!("training month {}-{:02} has no usable trips", year, month));
    }

    let artifacts = ArtifactStore::new(dest_path);
    let mut rows = [(Split::Train, 0), (Split::Val, 0), (Split::Test, 0)];
    for (slot, (split, dicts, target)) in rows.iter_mut().zip(features) {
        let dataset = Dataset::new(vectorizer.transform(&dicts)?, target)?;
        artifacts.save_split(split, &dataset)?;
        *slot = (split, dataset.len());
    }
    artifacts.save_vectorizer(&vectorizer)?;
    info!(
        "Wrote splits and a {}-feature vectorizer to {}",
        vectorizer.n_features(),
        dest_path.display()
    );

    Ok(PrepareOutcome {
        rows,
        n_features: vectorizer.n_features(),
    })
}
