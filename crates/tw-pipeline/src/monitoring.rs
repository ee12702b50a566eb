//! Drift monitoring entry point: reference and current data in, one metrics
//! row per day and a JSON-lines alert log out.

use chrono::NaiveDateTime;
use crossbeam_channel::{bounded, Receiver};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use tw_data::{label_durations, numeric_dicts, MetricsStore, TripFrame, TripLoader};
use tw_models::{DictVectorizer, LinearRegression, Model, ModelBundle, Regressor};
use tw_monitor::{ColumnMapping, DailyMonitor, DailyMonitorConfig, DriftAlert, MonitorSummary};
use tw_types::{internal_error, validation_error, TwResult};

use crate::config::PipelineConfig;

/// Precomputed label column of the reference dataset.
pub const TARGET_COLUMN: &str = "duration_min";
pub const ALERT_LOG_FILE: &str = "drift_alerts.jsonl";
const ALERT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct MonitorRequest {
    pub reference_path: PathBuf,
    pub current_path: PathBuf,
    /// Bundle to score with; fitted on the reference data when missing.
    pub model_path: PathBuf,
    pub begin: Option<NaiveDateTime>,
    pub days: Option<u32>,
    pub interval: Option<Duration>,
    pub keep_history: bool,
}

impl MonitorRequest {
    pub fn monitor_config(&self) -> DailyMonitorConfig {
        let mut config = DailyMonitorConfig::default();
        if let Some(begin) = self.begin {
            config.begin = begin;
        }
        if let Some(days) = self.days {
            config.days = days;
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    pub summary: MonitorSummary,
    pub rows_stored: usize,
    pub alerts_logged: usize,
    pub alert_log: PathBuf,
}

/// Reference rows with a label: the stored target column when present,
/// otherwise durations derived from the pickup and dropoff timestamps.
fn labelled_reference(reference: &TripFrame) -> TwResult<(TripFrame, Vec<f64>)> {
    if reference.has_column(TARGET_COLUMN) {
        let targets = reference.numeric(TARGET_COLUMN)?;
        let rows: Vec<usize> = (0..reference.n_rows()).filter(|&i| targets[i].is_some()).collect();
        let labels = rows.iter().filter_map(|&i| targets[i]).collect();
        return Ok((reference.select_rows(&rows), labels));
    }
    let trips = label_durations(reference, reference.require_service()?)?;
    Ok((trips.frame, trips.durations))
}

/// Least-squares model over the mapped features, missing values as zero.
pub fn fit_reference_model(reference: &TripFrame, mapping: &ColumnMapping) -> TwResult<ModelBundle> {
    let (frame, labels) = labelled_reference(reference)?;
    if labels.is_empty() {
        return Err(validation_error!("reference data has no labelled rows"));
    }
    let dicts = numeric_dicts(&frame, &mapping.feature_columns())?;
    let mut vectorizer = DictVectorizer::new();
    let x = vectorizer.fit_transform(&dicts)?;
    let mut model = LinearRegression::new();
    model.fit(&x, &labels)?;
    info!("Fitted reference model on {} rows", labels.len());
    Ok(ModelBundle::new(vectorizer, Model::Linear(model)))
}

/// Write every alert received until all senders are gone.
fn write_alert_log(alerts: Receiver<DriftAlert>, path: &Path) -> TwResult<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut out = BufWriter::new(file);
    let mut written = 0;
    for alert in alerts {
        serde_json::to_writer(&mut out, &alert)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Run the daily monitor over the current dataset until every day is done
/// or `shutdown` fires.
pub async fn run_monitor(
    config: &PipelineConfig,
    request: &MonitorRequest,
    shutdown: watch::Receiver<bool>,
) -> TwResult<MonitorOutcome> {
    let monitor_config = request.monitor_config();
    monitor_config.validate()?;

    let loader = TripLoader::new();
    let reference = loader.load_parquet_file(&request.reference_path).await?;
    let current = loader.load_parquet_file(&request.current_path).await?;

    let bundle = if request.model_path.exists() {
        ModelBundle::load(&request.model_path)?
    } else {
        warn!(
            "No model at {}, fitting one on the reference data",
            request.model_path.display()
        );
        let bundle = fit_reference_model(&reference, &monitor_config.mapping)?;
        bundle.save(&request.model_path)?;
        bundle
    };

    let store = MetricsStore::open(&config.metrics_db)?;
    store.bootstrap(request.keep_history)?;
    info!("Writing drift metrics to {}", config.metrics_db.display());

    let alert_log = config.metrics_db.with_file_name(ALERT_LOG_FILE);
    let (alert_tx, alert_rx) = bounded(ALERT_CHANNEL_CAPACITY);
    let writer_path = alert_log.clone();
    let writer = thread::spawn(move || write_alert_log(alert_rx, &writer_path));

    let result = match DailyMonitor::new(monitor_config, bundle, reference, store, alert_tx) {
        Ok(mut monitor) => {
            let summary = monitor.run(&current, shutdown).await;
            let rows = monitor.store().count();
            // Dropping the monitor closes the alert channel.
            drop(monitor);
            summary.and_then(|s| rows.map(|r| (s, r)))
        }
        Err(e) => Err(e),
    };

    let alerts_logged = writer
        .join()
        .map_err(|_| internal_error!("alert writer panicked"))??;
    let (summary, rows_stored) = result?;
    info!(
        "Stored {} metric rows, logged {} alerts to {}",
        rows_stored,
        alerts_logged,
        alert_log.display()
    );
    Ok(MonitorOutcome {
        summary,
        rows_stored,
        alerts_logged,
        alert_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;
    use tw_monitor::{DriftAlertKind, DriftSeverity};

    fn at(day: u32, hour: u32, minute: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
    }

    /// `per_day` green trips on each of `days` days. Duration, fare and
    /// total all follow the distance.
    fn trips(days: u32, per_day: usize, distance_shift: f64) -> TripFrame {
        let mut pickups = Vec::new();
        let mut dropoffs = Vec::new();
        let mut distance = Vec::new();
        for day in 1..=days {
            for k in 0..per_day {
                let d = 1.0 + (k % 10) as f64 + distance_shift;
                pickups.push(at(day, 8, 0));
                dropoffs.push(at(day, 8, 5 + (k % 10) as u32 * 2));
                distance.push(Some(d));
            }
        }
        let n = pickups.len();
        let fare: Vec<Option<f64>> = distance.iter().map(|d| d.map(|d| 3.0 + 2.5 * d)).collect();
        let total: Vec<Option<f64>> = fare.iter().map(|f| f.map(|f| f + 1.0)).collect();
        TripFrame::new(n)
            .with_timestamps("lpep_pickup_datetime", pickups)
            .unwrap()
            .with_timestamps("lpep_dropoff_datetime", dropoffs)
            .unwrap()
            .with_numeric("trip_distance", distance)
            .unwrap()
            .with_numeric("fare_amount", fare)
            .unwrap()
            .with_numeric("total_amount", total)
            .unwrap()
            .with_numeric("passenger_count", vec![Some(1.0); n])
            .unwrap()
            .with_numeric("PULocationID", (0..n).map(|i| Some((i % 4) as f64)).collect())
            .unwrap()
            .with_numeric("DOLocationID", (0..n).map(|i| Some((i % 3) as f64)).collect())
            .unwrap()
    }

    #[test]
    fn reference_model_uses_derived_durations() {
        let reference = trips(1, 40, 0.0);
        let bundle = fit_reference_model(&reference, &ColumnMapping::default()).unwrap();
        assert_eq!(bundle.vectorizer.n_features(), 6);

        let dicts = numeric_dicts(&reference, &ColumnMapping::default().feature_columns()).unwrap();
        let predictions = bundle.predict_dicts(&dicts[..10]).unwrap();
        // Duration = 5 + 2 * (distance - 1), exactly linear in the features.
        for (k, p) in predictions.iter().enumerate() {
            assert!((p - (5.0 + 2.0 * k as f64)).abs() < 0.05, "row {k}: {p}");
        }
    }

    #[test]
    fn request_overrides_defaults() {
        let request = MonitorRequest {
            reference_path: PathBuf::from("reference.parquet"),
            current_path: PathBuf::from("current.parquet"),
            model_path: PathBuf::from("model.json"),
            begin: None,
            days: Some(3),
            interval: Some(Duration::from_millis(5)),
            keep_history: false,
        };
        let config = request.monitor_config();
        assert_eq!(config.days, 3);
        assert_eq!(config.interval, Duration::from_millis(5));
        assert_eq!(config.begin, at(1, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn stores_rows_and_logs_alerts() {
        let dir = tempdir().unwrap();
        let loader = TripLoader::new();
        let reference_path = dir.path().join("data/reference.parquet");
        let current_path = dir.path().join("data/green_tripdata_2024-03.parquet");
        loader.write_trip_frame(&reference_path, &trips(1, 60, 0.0)).unwrap();
        // Day 1 matches the reference, day 2 is shifted, day 3 is empty.
        let mut current = trips(2, 60, 0.0);
        let shifted = trips(2, 60, 20.0);
        let day_two: Vec<usize> = (60..120).collect();
        let mut distance = current.numeric("trip_distance").unwrap().to_vec();
        let mut fare = current.numeric("fare_amount").unwrap().to_vec();
        let mut total = current.numeric("total_amount").unwrap().to_vec();
        for &i in &day_two {
            distance[i] = shifted.numeric("trip_distance").unwrap()[i];
            fare[i] = shifted.numeric("fare_amount").unwrap()[i];
            total[i] = shifted.numeric("total_amount").unwrap()[i];
        }
        current.insert_numeric("trip_distance", distance).unwrap();
        current.insert_numeric("fare_amount", fare).unwrap();
        current.insert_numeric("total_amount", total).unwrap();
        loader.write_trip_frame(&current_path, &current).unwrap();

        let config = PipelineConfig::with_root(dir.path());
        let request = MonitorRequest {
            reference_path,
            current_path,
            model_path: dir.path().join("models/lin_reg.json"),
            begin: None,
            days: Some(3),
            interval: Some(Duration::from_millis(1)),
            keep_history: false,
        };
        let (_tx, rx) = watch::channel(false);
        let outcome = run_monitor(&config, &request, rx).await.unwrap();

        assert!(request.model_path.exists());
        assert_eq!(outcome.summary.days_processed, 2);
        assert_eq!(outcome.summary.days_skipped, 1);
        assert_eq!(outcome.rows_stored, 2);

        let log = std::fs::read_to_string(&outcome.alert_log).unwrap();
        let alerts: Vec<DriftAlert> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(alerts.len(), outcome.alerts_logged);
        assert!(alerts
            .iter()
            .any(|a| a.severity == DriftSeverity::Critical && matches!(a.kind, DriftAlertKind::PredictionDrift { .. })));
        assert!(alerts.iter().all(|a| match &a.kind {
            DriftAlertKind::PredictionDrift { day, .. } | DriftAlertKind::DatasetDrift { day, .. } => {
                *day == NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
            }
            _ => true,
        }));
    }
}
