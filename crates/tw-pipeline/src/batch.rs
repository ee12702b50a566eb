//! Monthly batch scoring of trip partitions.

use std::path::{Path, PathBuf};
use tracing::{error, info};

use tw_data::{label_durations, location_dicts, month_key, ride_ids, BlobResult, Location, ObjectStore, TripFrame, TripLoader};
use tw_models::{mean, std_dev, ModelBundle};
use tw_types::{validation_error, PredictionRow, TwResult};

use crate::config::PipelineConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub year: i32,
    pub month: u32,
    /// Serialized (vectorizer, model) bundle.
    pub model_path: PathBuf,
    /// Also copy the output into the predictions bucket.
    pub upload: bool,
}

impl BatchRequest {
    pub fn validate(&self) -> TwResult<()> {
        if !(1..=12).contains(&self.month) {
            return Err(validation_error!("month must be in 1..=12, got {}", self.month));
        }
        if !(1..=9999).contains(&self.year) {
            return Err(validation_error!("year must be in 1..=9999, got {}", self.year));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub input: String,
    pub output: PathBuf,
    pub rows_read: usize,
    pub rows_scored: usize,
    pub mean_prediction: f64,
    pub std_prediction: f64,
    /// Object key of the uploaded copy, when the upload succeeded.
    pub uploaded_key: Option<String>,
}

/// Score every trip of `frame` lasting 1 to 60 minutes.
pub fn score_frame(bundle: &ModelBundle, frame: &TripFrame, year: i32, month: u32) -> TwResult<Vec<PredictionRow>> {
    let service = frame.require_service()?;
    let trips = label_durations(frame, service)?;
    let dicts = location_dicts(&trips.frame)?;
    let predictions = if dicts.is_empty() {
        Vec::new()
    } else {
        bundle.predict_dicts(&dicts)?
    };
    Ok(ride_ids(year, month, &trips.source_rows)
        .into_iter()
        .zip(predictions)
        .map(|(ride_id, predicted_duration)| PredictionRow {
            ride_id,
            predicted_duration,
        })
        .collect())
}

/// Copy `file` into `bucket` under `{year}/{MonthName}/{file name}`,
/// creating the bucket when missing.
pub fn upload_predictions(objects: &ObjectStore, bucket: &str, file: &Path, year: i32, month: u32) -> BlobResult<String> {
    if objects.bucket_exists(bucket) {
        info!("Bucket {} already exists", bucket);
    } else {
        objects.make_bucket(bucket)?;
    }
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "predictions.parquet".to_string());
    let key = month_key(year, month, &file_name);
    objects.put_object(bucket, &key, file)?;
    Ok(key)
}

/// Read the input partition for the request month, score it and write the
/// output partition.
pub async fn run_batch(config: &PipelineConfig, request: &BatchRequest) -> TwResult<BatchOutcome> {
    request.validate()?;
    let input = config.input_path(request.year, request.month);
    let output = config.output_path(request.year, request.month);
    info!("Input file: {}", input);
    info!("Output file: {}", output);

    let bundle = ModelBundle::load(&request.model_path)?;
    let objects = config.object_store()?;
    let loader = TripLoader::new();

    let input_file = Location::parse(&input)?.fetch(&objects, &config.cache_dir).await?;
    let frame = loader.load_parquet_file(&input_file).await?;
    let rows = score_frame(&bundle, &frame, request.year, request.month)?;

    let predictions: Vec<f64> = rows.iter().map(|r| r.predicted_duration).collect();
    let mean_prediction = mean(&predictions);
    let std_prediction = std_dev(&predictions);
    info!("Predicted mean duration: {:.4}", mean_prediction);
    info!("Standard deviation of predictions: {:.4}", std_prediction);

    let output_file = Location::parse(&output)?.writable_path(&objects)?;
    loader.write_predictions(&output_file, &rows)?;

    let uploaded_key = if request.upload {
        match upload_predictions(&objects, &config.predictions_bucket, &output_file, request.year, request.month) {
            Ok(key) => {
                info!("Uploaded predictions as {} in bucket {}", key, config.predictions_bucket);
                Some(key)
            }
            Err(e) => {
                error!("Upload to bucket {} failed: {}", config.predictions_bucket, e);
                None
            }
        }
    } else {
        None
    };

    Ok(BatchOutcome {
        input,
        output: output_file,
        rows_read: frame.n_rows(),
        rows_scored: rows.len(),
        mean_prediction,
        std_prediction,
        uploaded_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::tempdir;
    use tw_models::{DictVectorizer, FeatureDict, LinearRegression, Model};

    fn dt(hour: u32, minute: u32, second: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
    }

    fn frame() -> TripFrame {
        TripFrame::new(4)
            .with_numeric("PULocationID", vec![None, Some(1.0), Some(1.0), Some(3.0)])
            .unwrap()
            .with_numeric("DOLocationID", vec![None, Some(1.0), None, Some(4.0)])
            .unwrap()
            .with_timestamps("tpep_pickup_datetime", vec![dt(1, 1, 0), dt(1, 2, 0), dt(1, 2, 0), dt(1, 2, 0)])
            .unwrap()
            .with_timestamps("tpep_dropoff_datetime", vec![dt(1, 10, 0), dt(1, 10, 0), dt(1, 2, 59), dt(2, 2, 1)])
            .unwrap()
    }

    /// Intercept 10, +1 for pickup "1", +2 for dropoff "-1".
    fn bundle() -> ModelBundle {
        let dicts: Vec<FeatureDict> = [("-1", "-1"), ("1", "1")]
            .iter()
            .map(|(pu, dol)| {
                [
                    ("PULocationID".to_string(), (*pu).into()),
                    ("DOLocationID".to_string(), (*dol).into()),
                ]
                .into_iter()
                .collect()
            })
            .collect();
        let mut dv = DictVectorizer::new();
        dv.fit(&dicts);
        // Sorted features: DOLocationID=-1, DOLocationID=1, PULocationID=-1, PULocationID=1
        let lr = LinearRegression::from_weights(vec![2.0, 0.0, 0.0, 1.0], 10.0);
        ModelBundle::new(dv, Model::Linear(lr))
    }

    #[test]
    fn scores_only_plausible_trips() {
        let rows = score_frame(&bundle(), &frame(), 2023, 1).unwrap();
        assert_eq!(
            rows,
            vec![
                PredictionRow {
                    ride_id: "2023/01_0".to_string(),
                    predicted_duration: 12.0,
                },
                PredictionRow {
                    ride_id: "2023/01_1".to_string(),
                    predicted_duration: 11.0,
                },
            ]
        );
    }

    #[test]
    fn request_validation() {
        let mut request = BatchRequest {
            year: 2023,
            month: 3,
            model_path: PathBuf::from("model.json"),
            upload: false,
        };
        assert!(request.validate().is_ok());
        request.month = 13;
        assert!(request.validate().is_err());
    }

    #[test]
    fn upload_creates_bucket_and_month_key() {
        let dir = tempdir().unwrap();
        let objects = ObjectStore::new(dir.path().join("objects")).unwrap();
        let file = dir.path().join("batch-2023-03.parquet");
        std::fs::write(&file, b"rows").unwrap();

        let key = upload_predictions(&objects, "batch-predictions", &file, 2023, 3).unwrap();
        assert_eq!(key, "2023/March/batch-2023-03.parquet");
        assert_eq!(objects.get_object("batch-predictions", &key).unwrap(), b"rows");

        assert!(upload_predictions(&objects, "Bad_Bucket", &file, 2023, 3).is_err());
    }
}
