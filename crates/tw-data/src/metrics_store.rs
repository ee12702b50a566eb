use chrono::DateTime;
use duckdb::{params, Connection};
use std::path::Path;

use tw_types::{DataError, MetricsRow, TwResult};

pub const METRICS_TABLE: &str = "drift_metrics";

/// Append-only drift metrics table with a DuckDB backend
#[derive(Debug)]
pub struct MetricsStore {
    connection: Connection,
}

fn db_err(e: duckdb::Error) -> DataError {
    DataError::DatabaseConnection { message: e.to_string() }
}

impl MetricsStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> TwResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let connection = Connection::open(db_path).map_err(db_err)?;
        Ok(Self { connection })
    }

    pub fn in_memory() -> TwResult<Self> {
        let connection = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self { connection })
    }

    /// Create the metrics table. Without `keep_history` any existing table
    /// is dropped first.
    pub fn bootstrap(&self, keep_history: bool) -> TwResult<()> {
        if !keep_history {
            self.connection
                .execute_batch(&format!("DROP TABLE IF EXISTS {METRICS_TABLE};"))
                .map_err(db_err)?;
        }
        self.connection
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {METRICS_TABLE} (
                    timestamp TIMESTAMP NOT NULL,
                    prediction_drift DOUBLE,
                    num_drifted_columns BIGINT,
                    share_missing_values DOUBLE,
                    fare_amount_quantile DOUBLE,
                    trip_distance_quantile DOUBLE
                );"
            ))
            .map_err(db_err)?;
        tracing::debug!("Bootstrapped table {} (keep_history={})", METRICS_TABLE, keep_history);
        Ok(())
    }

    pub fn insert(&self, row: &MetricsRow) -> TwResult<()> {
        let query = format!("INSERT INTO {METRICS_TABLE} VALUES (CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?)");
        let timestamp = row.timestamp.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        self.connection
            .execute(
                &query,
                params![
                    timestamp,
                    row.prediction_drift,
                    row.num_drifted_columns,
                    row.share_missing_values,
                    row.fare_amount_quantile,
                    row.trip_distance_quantile,
                ],
            )
            .map_err(|e| DataError::QueryFailed {
                query: query.clone(),
                error: e.to_string(),
            })?;
        Ok(())
    }

    /// All rows in timestamp order.
    pub fn rows(&self) -> TwResult<Vec<MetricsRow>> {
        let query = format!(
            "SELECT epoch_us(timestamp), prediction_drift, num_drifted_columns, share_missing_values,
                    fare_amount_quantile, trip_distance_quantile
             FROM {METRICS_TABLE} ORDER BY timestamp"
        );
        let query_failed = |e: duckdb::Error| DataError::QueryFailed {
            query: query.clone(),
            error: e.to_string(),
        };
        let mut stmt = self.connection.prepare(&query).map_err(query_failed)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;

        raw.into_iter()
            .map(|(micros, drift, drifted, missing, fare, distance)| {
                let timestamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| DataError::InvalidFormat {
                    message: format!("timestamp out of range: {micros}"),
                })?;
                Ok(MetricsRow {
                    timestamp,
                    prediction_drift: drift,
                    num_drifted_columns: drifted,
                    share_missing_values: missing,
                    fare_amount_quantile: fare,
                    trip_distance_quantile: distance,
                })
            })
            .collect()
    }

    pub fn count(&self) -> TwResult<usize> {
        let query = format!("SELECT COUNT(*) FROM {METRICS_TABLE}");
        let n: i64 = self
            .connection
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| DataError::QueryFailed {
                query: query.clone(),
                error: e.to_string(),
            })?;
        Ok(n as usize)
    }
}
