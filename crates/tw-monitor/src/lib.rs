//! # tw-monitor
//!
//! Drift statistics, per-window drift reports and the paced daily monitor
//! that stores one metrics row per day and raises [`DriftAlert`]s.

pub mod alerts;
pub mod monitor;
pub mod report;
pub mod stats;

pub use alerts::{DriftAlert, DriftAlertKind, DriftSeverity};
pub use monitor::{DailyMonitor, DailyMonitorConfig, MonitorSummary};
pub use report::{ColumnDrift, ColumnMapping, DriftReport, StatTest, PREDICTION_COLUMN};
