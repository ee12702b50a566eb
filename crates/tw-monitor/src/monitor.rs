//! Daily drift monitor: a paced loop over calendar days with alert emission.
//!
//! The [`DailyMonitor`] slices the current data one day at a time, scores the
//! slice with a fixed model bundle, compares it against the reference
//! dataset and appends the resulting metrics row to the [`MetricsStore`].
//! Alerts go out on the channel supplied at construction time.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use tw_data::{numeric_dicts, MetricsStore, TripFrame};
use tw_models::ModelBundle;
use tw_types::{MetricsRow, MonitorError, TwResult};

use crate::alerts::{DriftAlert, DriftAlertKind, DriftSeverity};
use crate::report::{ColumnMapping, DriftReport, FARE_AMOUNT, PREDICTION_COLUMN, TRIP_DISTANCE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMonitorConfig {
    /// Start of the first day.
    pub begin: NaiveDateTime,
    pub days: u32,
    /// Delay between consecutive days.
    pub interval: Duration,
    pub mapping: ColumnMapping,
    /// Columns and quantile levels recorded per day.
    pub quantiles: Vec<(String, f64)>,
    /// Share of missing cells above which a warning fires.
    pub missing_share_limit: f64,
}

impl Default for DailyMonitorConfig {
    fn default() -> Self {
        let begin = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            begin,
            days: 31,
            interval: Duration::from_secs(10),
            mapping: ColumnMapping::default(),
            quantiles: vec![(FARE_AMOUNT.to_string(), 0.5), (TRIP_DISTANCE.to_string(), 0.5)],
            missing_share_limit: 0.1,
        }
    }
}

impl DailyMonitorConfig {
    pub fn validate(&self) -> TwResult<()> {
        if self.days == 0 {
            return Err(MonitorError::InvalidWindow {
                message: "at least one day is required".to_string(),
            }
            .into());
        }
        if self.interval.is_zero() {
            return Err(MonitorError::InvalidWindow {
                message: "interval must be positive".to_string(),
            }
            .into());
        }
        if self.mapping.prediction.is_none() {
            return Err(MonitorError::InvalidWindow {
                message: "a prediction column is required".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// `[start, end)` of day `i`.
    pub fn day_window(&self, i: u32) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.begin + ChronoDuration::days(i64::from(i));
        (start, start + ChronoDuration::days(1))
    }
}

/// What a monitor run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub days_processed: u32,
    pub days_skipped: u32,
    pub alerts_emitted: usize,
    pub cancelled: bool,
}

pub struct DailyMonitor {
    config: DailyMonitorConfig,
    bundle: ModelBundle,
    reference: TripFrame,
    store: MetricsStore,
    alert_tx: Sender<DriftAlert>,
}

impl DailyMonitor {
    /// Build a monitor. A reference dataset without a prediction column is
    /// scored with `bundle` first.
    pub fn new(
        config: DailyMonitorConfig,
        bundle: ModelBundle,
        reference: TripFrame,
        store: MetricsStore,
        alert_tx: Sender<DriftAlert>,
    ) -> TwResult<Self> {
        config.validate()?;
        if reference.is_empty() {
            return Err(MonitorError::EmptyReference.into());
        }
        let mut monitor = Self {
            config,
            bundle,
            reference,
            store,
            alert_tx,
        };
        let column = monitor.prediction_column().to_string();
        if !monitor.reference.has_column(&column) {
            info!("Scoring {} reference rows", monitor.reference.n_rows());
            let predictions = monitor.predict(&monitor.reference)?;
            monitor
                .reference
                .insert_numeric(column, predictions.into_iter().map(Some).collect())?;
        }
        Ok(monitor)
    }

    pub fn config(&self) -> &DailyMonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn reference(&self) -> &TripFrame {
        &self.reference
    }

    fn prediction_column(&self) -> &str {
        self.config.mapping.prediction.as_deref().unwrap_or(PREDICTION_COLUMN)
    }

    fn predict(&self, frame: &TripFrame) -> TwResult<Vec<f64>> {
        let dicts = numeric_dicts(frame, &self.config.mapping.feature_columns())?;
        self.bundle.predict_dicts(&dicts)
    }

    /// Report for day `i` of `current`, or `None` when the day has no trips.
    pub fn evaluate_day(&self, current: &TripFrame, i: u32) -> TwResult<Option<(MetricsRow, DriftReport)>> {
        let (start, end) = self.config.day_window(i);
        let pickup = current.require_service()?.pickup_column();
        let rows = current.rows_between(pickup, start, end)?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut slice = current.select_rows(&rows);
        let predictions = self.predict(&slice)?;
        slice.insert_numeric(self.prediction_column(), predictions.into_iter().map(Some).collect())?;

        let report = DriftReport::run(&self.reference, &slice, &self.config.mapping, &self.config.quantiles)?;
        let row = report.metrics_row(start.and_utc());
        debug!(
            "{}: {} trips, prediction_drift={:.4}, drifted={}",
            start.date(),
            rows.len(),
            row.prediction_drift,
            row.num_drifted_columns
        );
        Ok(Some((row, report)))
    }

    /// Evaluate day `i`, append its row and emit alerts. Returns the number
    /// of alerts sent, or `None` for a day without trips.
    pub fn process_day(&self, current: &TripFrame, i: u32) -> TwResult<Option<usize>> {
        let Some((row, report)) = self.evaluate_day(current, i)? else {
            let (start, _) = self.config.day_window(i);
            warn!("No trips on {}, skipping", start.date());
            return Ok(None);
        };
        self.store.insert(&row)?;
        Ok(Some(self.check_alerts(self.config.day_window(i).0.date(), &report)))
    }

    fn check_alerts(&self, day: NaiveDate, report: &DriftReport) -> usize {
        let mut sent = 0;
        if let Some(prediction) = report.prediction.as_ref().filter(|p| p.drift_detected) {
            sent += self.emit(DriftAlert::new(
                DriftSeverity::Critical,
                DriftAlertKind::PredictionDrift {
                    day,
                    stat_test: prediction.stat_test.to_string(),
                    score: prediction.score,
                    threshold: prediction.threshold,
                },
                format!(
                    "Prediction drift on {day}: {} score {:.4} (threshold {})",
                    prediction.stat_test, prediction.score, prediction.threshold
                ),
            ));
        }
        if report.dataset_drift {
            sent += self.emit(DriftAlert::new(
                DriftSeverity::Critical,
                DriftAlertKind::DatasetDrift {
                    day,
                    drifted_columns: report.number_of_drifted_columns,
                    share: report.share_of_drifted_columns,
                },
                format!(
                    "Dataset drift on {day}: {} of {} columns drifted",
                    report.number_of_drifted_columns,
                    report.columns.len()
                ),
            ));
        }
        if report.share_missing_values > self.config.missing_share_limit {
            sent += self.emit(DriftAlert::new(
                DriftSeverity::Warning,
                DriftAlertKind::MissingValues {
                    day,
                    share: report.share_missing_values,
                    limit: self.config.missing_share_limit,
                },
                format!(
                    "{:.1}% of cells missing on {day} (limit {:.1}%)",
                    report.share_missing_values * 100.0,
                    self.config.missing_share_limit * 100.0
                ),
            ));
        }
        sent
    }

    fn emit(&self, alert: DriftAlert) -> usize {
        match alert.severity {
            DriftSeverity::Critical => warn!(%alert.message, "DRIFT CRITICAL"),
            DriftSeverity::Warning => warn!(%alert.message, "DRIFT WARNING"),
            DriftSeverity::Info => info!(%alert.message, "DRIFT INFO"),
        }
        // A full or disconnected channel drops the alert; the row is
        // already stored.
        usize::from(self.alert_tx.try_send(alert).is_ok())
    }

    /// Walk every configured day, one per tick, until done or `shutdown`
    /// turns true.
    pub async fn run(&mut self, current: &TripFrame, mut shutdown: watch::Receiver<bool>) -> TwResult<MonitorSummary> {
        let mut summary = MonitorSummary::default();
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_open = true;

        info!(
            "Monitoring {} days from {} every {:?}",
            self.config.days, self.config.begin, self.config.interval
        );
        for i in 0..self.config.days {
            if *shutdown.borrow() {
                summary.cancelled = true;
                break;
            }
            if shutdown_open {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        match changed {
                            Ok(()) if *shutdown.borrow() => {
                                summary.cancelled = true;
                                break;
                            }
                            Ok(()) => {
                                ticker.tick().await;
                            }
                            Err(_) => {
                                shutdown_open = false;
                                ticker.tick().await;
                            }
                        }
                    }
                }
            } else {
                ticker.tick().await;
            }

            match self.process_day(current, i)? {
                Some(alerts) => {
                    summary.days_processed += 1;
                    summary.alerts_emitted += alerts;
                }
                None => summary.days_skipped += 1,
            }
        }

        if summary.cancelled {
            info!("Monitor stopped after {} days", summary.days_processed);
        } else {
            info!(
                "Monitor finished: {} days stored, {} skipped, {} alerts",
                summary.days_processed, summary.days_skipped, summary.alerts_emitted
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use tw_models::{DictVectorizer, FeatureValue, LinearRegression, Model};
    use tw_types::TaxiService;

    const PICKUP: &str = "lpep_pickup_datetime";

    fn mapping() -> ColumnMapping {
        ColumnMapping {
            prediction: Some(PREDICTION_COLUMN.to_string()),
            numerical_features: vec![TRIP_DISTANCE.to_string(), FARE_AMOUNT.to_string()],
            categorical_features: vec![],
        }
    }

    fn config(days: u32) -> DailyMonitorConfig {
        DailyMonitorConfig {
            days,
            interval: Duration::from_millis(1),
            mapping: mapping(),
            ..Default::default()
        }
    }

    /// prediction = 2 * trip_distance + 1
    fn bundle() -> ModelBundle {
        let mut dv = DictVectorizer::new();
        let dicts = vec![[
            (TRIP_DISTANCE.to_string(), FeatureValue::Num(1.0)),
            (FARE_AMOUNT.to_string(), FeatureValue::Num(1.0)),
        ]
        .into_iter()
        .collect()];
        dv.fit(&dicts);
        // Feature order is sorted: fare_amount, trip_distance.
        let model = Model::Linear(LinearRegression::from_weights(vec![0.0, 2.0], 1.0));
        ModelBundle::new(dv, model)
    }

    /// `per_day` trips per day for `days` days from 2024-03-01, hourly.
    fn trips(days: u32, per_day: u32, shift: f64) -> TripFrame {
        let begin = DailyMonitorConfig::default().begin;
        let mut stamps = Vec::new();
        let mut distances = Vec::new();
        let mut fares = Vec::new();
        for d in 0..days {
            for k in 0..per_day {
                stamps.push(Some(
                    begin + ChronoDuration::days(i64::from(d)) + ChronoDuration::hours(i64::from(k % 24)),
                ));
                distances.push(Some(f64::from(k) * 0.5 + shift));
                fares.push(Some(f64::from(k) * 2.0 + shift));
            }
        }
        TripFrame::new(stamps.len())
            .with_timestamps(PICKUP, stamps)
            .unwrap()
            .with_numeric(TRIP_DISTANCE, distances)
            .unwrap()
            .with_numeric(FARE_AMOUNT, fares)
            .unwrap()
    }

    fn store() -> MetricsStore {
        let store = MetricsStore::in_memory().unwrap();
        store.bootstrap(false).unwrap();
        store
    }

    #[test]
    fn default_config_covers_march_2024() {
        let cfg = DailyMonitorConfig::default();
        assert_eq!(cfg.days, 31);
        assert_eq!(cfg.interval, Duration::from_secs(10));
        let (start, end) = cfg.day_window(30);
        assert_eq!(start.to_string(), "2024-03-31 00:00:00");
        assert_eq!(end.to_string(), "2024-04-01 00:00:00");
        assert!(cfg.validate().is_ok());
        assert!(DailyMonitorConfig { days: 0, ..cfg }.validate().is_err());
    }

    #[test]
    fn reference_is_scored_when_prediction_missing() {
        let (tx, _rx) = unbounded();
        let reference = trips(1, 20, 0.0);
        assert_eq!(reference.service(), Some(TaxiService::Green));
        let monitor = DailyMonitor::new(config(1), bundle(), reference, store(), tx).unwrap();

        let predictions = monitor.reference().numeric(PREDICTION_COLUMN).unwrap();
        assert_eq!(predictions[0], Some(1.0));
        assert_eq!(predictions[3], Some(4.0));
    }

    #[test]
    fn empty_reference_is_rejected() {
        let (tx, _rx) = unbounded();
        let result = DailyMonitor::new(config(1), bundle(), TripFrame::new(0), store(), tx);
        assert!(result.is_err());
    }

    #[test]
    fn stable_day_produces_deterministic_row_without_alerts() {
        let (tx, rx) = unbounded();
        let monitor = DailyMonitor::new(config(1), bundle(), trips(1, 24, 0.0), store(), tx).unwrap();
        let current = trips(2, 24, 0.0);

        let (row, report) = monitor.evaluate_day(&current, 0).unwrap().unwrap();
        assert_eq!(row.num_drifted_columns, 0);
        assert!(row.prediction_drift > 0.99);
        assert_eq!(row.share_missing_values, 0.0);
        // Fares 0, 2, .., 46: median 23.
        assert_eq!(row.fare_amount_quantile, 23.0);
        assert_eq!(row.trip_distance_quantile, 5.75);
        assert!(!report.dataset_drift);

        let again = monitor.evaluate_day(&current, 0).unwrap().unwrap().0;
        assert_eq!(row.prediction_drift, again.prediction_drift);
        assert_eq!(monitor.process_day(&current, 0).unwrap(), Some(0));
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.store().count().unwrap(), 1);
    }

    #[test]
    fn shifted_day_emits_critical_alerts() {
        let (tx, rx) = unbounded();
        let monitor = DailyMonitor::new(config(1), bundle(), trips(1, 24, 0.0), store(), tx).unwrap();
        let current = trips(1, 24, 100.0);

        assert_eq!(monitor.process_day(&current, 0).unwrap(), Some(2));
        let first = rx.try_recv().unwrap();
        assert_eq!(first.severity, DriftSeverity::Critical);
        assert!(matches!(first.kind, DriftAlertKind::PredictionDrift { .. }));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second.kind, DriftAlertKind::DatasetDrift { drifted_columns: 3, .. }));
    }

    #[test]
    fn empty_day_is_skipped() {
        let (tx, _rx) = unbounded();
        let monitor = DailyMonitor::new(config(3), bundle(), trips(1, 24, 0.0), store(), tx).unwrap();
        let current = trips(1, 24, 0.0);
        assert!(monitor.evaluate_day(&current, 2).unwrap().is_none());
        assert_eq!(monitor.process_day(&current, 2).unwrap(), None);
        assert_eq!(monitor.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stores_one_row_per_day() {
        let (tx, _rx) = unbounded();
        let mut monitor = DailyMonitor::new(config(3), bundle(), trips(1, 24, 0.0), store(), tx).unwrap();
        let current = trips(3, 24, 0.0);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let summary = monitor.run(&current, stop_rx).await.unwrap();
        assert_eq!(summary.days_processed, 3);
        assert!(!summary.cancelled);

        let rows = monitor.store().rows().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].timestamp.date_naive().to_string(), "2024-03-03");
    }

    #[tokio::test]
    async fn run_survives_dropped_shutdown_sender() {
        let (tx, _rx) = unbounded();
        let mut monitor = DailyMonitor::new(config(2), bundle(), trips(1, 24, 0.0), store(), tx).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        let summary = monitor.run(&trips(2, 24, 0.0), stop_rx).await.unwrap();
        assert_eq!(summary.days_processed, 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (tx, _rx) = unbounded();
        let mut monitor = DailyMonitor::new(config(31), bundle(), trips(1, 24, 0.0), store(), tx).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();

        let summary = monitor.run(&trips(31, 24, 0.0), stop_rx).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.days_processed, 0);
        assert_eq!(monitor.store().count().unwrap(), 0);
    }
}
