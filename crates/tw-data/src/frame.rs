//! Columnar in-memory trip table.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use tw_types::{validation_error, DataError, TaxiService, TwResult};

/// Trip records held column by column. Numeric columns are widened to `f64`;
/// timestamps are naive wall-clock times; string columns such as
/// `store_and_fwd_flag` are kept as text. Missing cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripFrame {
    n_rows: usize,
    numeric: BTreeMap<String, Vec<Option<f64>>>,
    timestamps: BTreeMap<String, Vec<Option<NaiveDateTime>>>,
    text: BTreeMap<String, Vec<Option<String>>>,
}

impl TripFrame {
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            ..Default::default()
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    fn check_len(&self, name: &str, len: usize) -> TwResult<()> {
        if len != self.n_rows {
            return Err(validation_error!(
                "column {} has {} rows, frame has {}",
                name,
                len,
                self.n_rows
            ));
        }
        Ok(())
    }

    /// Add or replace a numeric column.
    pub fn insert_numeric(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> TwResult<()> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.numeric.insert(name, values);
        Ok(())
    }

    /// Add or replace a timestamp column.
    pub fn insert_timestamps(&mut self, name: impl Into<String>, values: Vec<Option<NaiveDateTime>>) -> TwResult<()> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.timestamps.insert(name, values);
        Ok(())
    }

    /// Add or replace a string column.
    pub fn insert_text(&mut self, name: impl Into<String>, values: Vec<Option<String>>) -> TwResult<()> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.text.insert(name, values);
        Ok(())
    }

    pub fn with_numeric(mut self, name: &str, values: Vec<Option<f64>>) -> TwResult<Self> {
        self.insert_numeric(name, values)?;
        Ok(self)
    }

    pub fn with_timestamps(mut self, name: &str, values: Vec<Option<NaiveDateTime>>) -> TwResult<Self> {
        self.insert_timestamps(name, values)?;
        Ok(self)
    }

    pub fn with_text(mut self, name: &str, values: Vec<Option<String>>) -> TwResult<Self> {
        self.insert_text(name, values)?;
        Ok(self)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.numeric.contains_key(name) || self.timestamps.contains_key(name) || self.text.contains_key(name)
    }

    pub fn numeric(&self, name: &str) -> TwResult<&[Option<f64>]> {
        self.numeric.get(name).map(Vec::as_slice).ok_or_else(|| {
            DataError::ColumnNotFound {
                column: name.to_string(),
                source_name: "trip frame".to_string(),
            }
            .into()
        })
    }

    pub fn timestamps(&self, name: &str) -> TwResult<&[Option<NaiveDateTime>]> {
        self.timestamps.get(name).map(Vec::as_slice).ok_or_else(|| {
            DataError::ColumnNotFound {
                column: name.to_string(),
                source_name: "trip frame".to_string(),
            }
            .into()
        })
    }

    pub fn text(&self, name: &str) -> TwResult<&[Option<String>]> {
        self.text.get(name).map(Vec::as_slice).ok_or_else(|| {
            DataError::ColumnNotFound {
                column: name.to_string(),
                source_name: "trip frame".to_string(),
            }
            .into()
        })
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.numeric.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn timestamp_columns(&self) -> impl Iterator<Item = (&str, &[Option<NaiveDateTime>])> {
        self.timestamps.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn text_columns(&self) -> impl Iterator<Item = (&str, &[Option<String>])> {
        self.text.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn n_columns(&self) -> usize {
        self.numeric.len() + self.timestamps.len() + self.text.len()
    }

    /// Service inferred from which pickup column is present.
    pub fn service(&self) -> Option<TaxiService> {
        [TaxiService::Green, TaxiService::Yellow]
            .into_iter()
            .find(|s| self.timestamps.contains_key(s.pickup_column()))
    }

    pub fn require_service(&self) -> TwResult<TaxiService> {
        self.service().ok_or_else(|| {
            DataError::ColumnNotFound {
                column: "lpep_pickup_datetime or tpep_pickup_datetime".to_string(),
                source_name: "trip frame".to_string(),
            }
            .into()
        })
    }

    /// A new frame holding the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            n_rows: rows.len(),
            numeric: self
                .numeric
                .iter()
                .map(|(k, col)| (k.clone(), rows.iter().map(|&r| col[r]).collect()))
                .collect(),
            timestamps: self
                .timestamps
                .iter()
                .map(|(k, col)| (k.clone(), rows.iter().map(|&r| col[r]).collect()))
                .collect(),
            text: self
                .text
                .iter()
                .map(|(k, col)| (k.clone(), rows.iter().map(|&r| col[r].clone()).collect()))
                .collect(),
        }
    }

    /// Rows whose `column` timestamp lies in `[start, end)`.
    pub fn rows_between(&self, column: &str, start: NaiveDateTime, end: NaiveDateTime) -> TwResult<Vec<usize>> {
        Ok(self
            .timestamps(column)?
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match t {
                Some(t) if *t >= start && *t < end => Some(i),
                _ => None,
            })
            .collect())
    }

    /// Number of missing cells across every column.
    pub fn missing_cells(&self) -> usize {
        let numeric: usize = self.numeric.values().map(|c| c.iter().filter(|v| v.is_none()).count()).sum();
        let stamps: usize = self
            .timestamps
            .values()
            .map(|c| c.iter().filter(|v| v.is_none()).count())
            .sum();
        let text: usize = self.text.values().map(|c| c.iter().filter(|v| v.is_none()).count()).sum();
        numeric + stamps + text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn frame() -> TripFrame {
        TripFrame::new(3)
            .with_timestamps("lpep_pickup_datetime", vec![Some(ts(1, 5)), Some(ts(2, 0)), None])
            .unwrap()
            .with_numeric("fare_amount", vec![Some(10.0), None, Some(7.5)])
            .unwrap()
            .with_text("store_and_fwd_flag", vec![Some("N".into()), None, Some("Y".into())])
            .unwrap()
    }

    #[test]
    fn columns_and_service() {
        let f = frame();
        assert_eq!(f.n_rows(), 3);
        assert_eq!(f.n_columns(), 3);
        assert_eq!(f.service(), Some(TaxiService::Green));
        assert!(f.numeric("trip_distance").is_err());
        assert!(f.has_column("store_and_fwd_flag"));
        assert_eq!(f.missing_cells(), 3);
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(TripFrame::new(2).with_numeric("x", vec![Some(1.0)]).is_err());
    }

    #[test]
    fn day_window_and_selection() {
        let f = frame();
        let rows = f.rows_between("lpep_pickup_datetime", ts(1, 0), ts(2, 0)).unwrap();
        assert_eq!(rows, vec![0]);

        let picked = f.select_rows(&[2, 0]);
        assert_eq!(picked.n_rows(), 2);
        assert_eq!(picked.numeric("fare_amount").unwrap(), &[Some(7.5), Some(10.0)]);
        assert_eq!(
            picked.text("store_and_fwd_flag").unwrap(),
            &[Some("Y".to_string()), Some("N".to_string())]
        );
    }
}
