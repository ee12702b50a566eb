use arrow::array::{
    Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tw_types::{DataError, PredictionRow, TwResult};

use crate::frame::TripFrame;

/// Reads and writes trip and prediction partitions as Parquet.
#[derive(Debug)]
pub struct TripLoader {
    batch_size: usize,
}

impl TripLoader {
    pub fn new() -> Self {
        Self {
            batch_size: 65_536,
        }
    }

    /// Load every numeric, timestamp and string column of a Parquet file.
    /// Other column types are skipped.
    pub async fn load_parquet_file<P: AsRef<Path>>(&self, file_path: P) -> TwResult<TripFrame> {
        let path = file_path.as_ref();
        tracing::info!("Loading Parquet data from: {}", path.display());

        if !path.exists() {
            return Err(DataError::ArtifactNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let file = fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to create Parquet reader for {}: {}", path.display(), e),
            })?
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to build Parquet reader: {}", e),
            })?;

        let mut numeric: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
        let mut stamps: BTreeMap<String, Vec<Option<NaiveDateTime>>> = BTreeMap::new();
        let mut text: BTreeMap<String, Vec<Option<String>>> = BTreeMap::new();
        let mut n_rows = 0usize;

        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read Parquet batch: {}", e),
            })?;
            Self::append_batch(&batch, &mut numeric, &mut stamps, &mut text)?;
            n_rows += batch.num_rows();
        }

        let mut frame = TripFrame::new(n_rows);
        for (name, values) in numeric {
            frame.insert_numeric(name, values)?;
        }
        for (name, values) in stamps {
            frame.insert_timestamps(name, values)?;
        }
        for (name, values) in text {
            frame.insert_text(name, values)?;
        }

        tracing::info!(
            "Loaded {} rows x {} columns from Parquet file: {}",
            frame.n_rows(),
            frame.n_columns(),
            path.display()
        );
        Ok(frame)
    }

    fn append_batch(
        batch: &RecordBatch,
        numeric: &mut BTreeMap<String, Vec<Option<f64>>>,
        stamps: &mut BTreeMap<String, Vec<Option<NaiveDateTime>>>,
        text: &mut BTreeMap<String, Vec<Option<String>>>,
    ) -> TwResult<()> {
        let schema = batch.schema();
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            match field.data_type() {
                DataType::Timestamp(_, _) => {
                    let target = DataType::Timestamp(TimeUnit::Microsecond, None);
                    let casted = cast(column, &target).map_err(|e| tw_types::TwError::Arrow(e.to_string()))?;
                    let values = casted
                        .as_any()
                        .downcast_ref::<TimestampMicrosecondArray>()
                        .ok_or_else(|| DataError::InvalidFormat {
                            message: format!("Invalid timestamp column {}", field.name()),
                        })?;
                    let out = stamps.entry(field.name().clone()).or_default();
                    out.extend((0..values.len()).map(|i| {
                        if values.is_null(i) {
                            None
                        } else {
                            values.value_as_datetime(i)
                        }
                    }));
                }
                dt if dt.is_numeric() || *dt == DataType::Null => {
                    let casted =
                        cast(column, &DataType::Float64).map_err(|e| tw_types::TwError::Arrow(e.to_string()))?;
                    let values = casted
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .ok_or_else(|| DataError::InvalidFormat {
                            message: format!("Invalid numeric column {}", field.name()),
                        })?;
                    numeric
                        .entry(field.name().clone())
                        .or_default()
                        .extend(values.iter().map(|v| v.filter(|x| !x.is_nan())));
                }
                DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                    let casted = cast(column, &DataType::Utf8).map_err(|e| tw_types::TwError::Arrow(e.to_string()))?;
                    let values = casted
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| DataError::InvalidFormat {
                            message: format!("Invalid string column {}", field.name()),
                        })?;
                    text.entry(field.name().clone())
                        .or_default()
                        .extend(values.iter().map(|v| v.map(str::to_string)));
                }
                other => {
                    tracing::debug!("Skipping column {} of type {:?}", field.name(), other);
                }
            }
        }
        Ok(())
    }

    /// Write a trip frame to Parquet, one column per frame column.
    pub fn write_trip_frame<P: AsRef<Path>>(&self, file_path: P, frame: &TripFrame) -> TwResult<()> {
        let mut fields = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();

        for (name, values) in frame.timestamp_columns() {
            fields.push(Field::new(name, DataType::Timestamp(TimeUnit::Microsecond, None), true));
            let micros: Vec<Option<i64>> = values
                .iter()
                .map(|t| t.map(|t| t.and_utc().timestamp_micros()))
                .collect();
            arrays.push(Arc::new(TimestampMicrosecondArray::from(micros)));
        }
        for (name, values) in frame.numeric_columns() {
            fields.push(Field::new(name, DataType::Float64, true));
            arrays.push(Arc::new(Float64Array::from(values.to_vec())));
        }
        for (name, values) in frame.text_columns() {
            fields.push(Field::new(name, DataType::Utf8, true));
            let cells: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
            arrays.push(Arc::new(StringArray::from(cells)));
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .map_err(|e| DataError::InvalidFormat { message: e.to_string() })?;
        write_batch(file_path.as_ref(), &batch)
    }

    /// Write `(ride_id, predicted_duration)` rows, uncompressed.
    pub fn write_predictions<P: AsRef<Path>>(&self, file_path: P, rows: &[PredictionRow]) -> TwResult<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ride_id", DataType::Utf8, false),
            Field::new("predicted_duration", DataType::Float64, false),
        ]));
        let ride_ids: Vec<&str> = rows.iter().map(|r| r.ride_id.as_str()).collect();
        let predictions: Vec<f64> = rows.iter().map(|r| r.predicted_duration).collect();
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(ride_ids)),
            Arc::new(Float64Array::from(predictions)),
        ];
        let batch = RecordBatch::try_new(schema, arrays)
            .map_err(|e| DataError::InvalidFormat { message: e.to_string() })?;
        write_batch(file_path.as_ref(), &batch)?;
        tracing::info!("Wrote {} predictions to {}", rows.len(), file_path.as_ref().display());
        Ok(())
    }

    pub async fn load_predictions<P: AsRef<Path>>(&self, file_path: P) -> TwResult<Vec<PredictionRow>> {
        let path = file_path.as_ref();
        if !path.exists() {
            return Err(DataError::ArtifactNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let file = fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| DataError::LoadingFailed { message: e.to_string() })?
            .build()
            .map_err(|e| DataError::LoadingFailed { message: e.to_string() })?;

        let mut rows = Vec::new();
        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataError::LoadingFailed { message: e.to_string() })?;
            let ride_ids = batch
                .column_by_name("ride_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| DataError::ColumnNotFound {
                    column: "ride_id".to_string(),
                    source_name: path.display().to_string(),
                })?;
            let predictions = batch
                .column_by_name("predicted_duration")
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| DataError::ColumnNotFound {
                    column: "predicted_duration".to_string(),
                    source_name: path.display().to_string(),
                })?;
            for i in 0..batch.num_rows() {
                rows.push(PredictionRow {
                    ride_id: ride_ids.value(i).to_string(),
                    predicted_duration: predictions.value(i),
                });
            }
        }
        Ok(rows)
    }
}

impl Default for TripLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn write_batch(path: &Path, batch: &RecordBatch) -> TwResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::UNCOMPRESSED)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| DataError::WritingFailed { message: e.to_string() })?;
    writer
        .write(batch)
        .map_err(|e| DataError::WritingFailed { message: e.to_string() })?;
    writer
        .close()
        .map_err(|e| DataError::WritingFailed { message: e.to_string() })?;
    Ok(())
}

/// Download `url` into `cache_dir`, reusing an earlier download of the same
/// file name.
pub async fn fetch_to_cache(url: &str, cache_dir: &Path) -> TwResult<PathBuf> {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DataError::DownloadFailed {
            url: url.to_string(),
            message: "url has no file name".to_string(),
        })?;
    let dest = cache_dir.join(file_name);
    if dest.exists() {
        tracing::debug!("Using cached download {}", dest.display());
        return Ok(dest);
    }

    tracing::info!("Downloading {}", url);
    let download_failed = |e: reqwest::Error| DataError::DownloadFailed {
        url: url.to_string(),
        message: e.to_string(),
    };
    let response = reqwest::get(url)
        .await
        .map_err(download_failed)?
        .error_for_status()
        .map_err(download_failed)?;
    let bytes = response.bytes().await.map_err(download_failed)?;

    fs::create_dir_all(cache_dir)?;
    let partial = dest.with_extension("part");
    fs::write(&partial, &bytes)?;
    fs::rename(&partial, &dest)?;
    tracing::info!("Downloaded {} bytes to {}", bytes.len(), dest.display());
    Ok(dest)
}
