//! Sparse feature matrices shared by the vectorizer, the models and the
//! dataset artifacts.

use serde::{Deserialize, Serialize};

use crate::errors::{TwError, TwResult};

/// Compressed sparse row matrix of `f64` features.
///
/// Rows are appended one at a time; column indices inside a row are kept
/// sorted and unique, and explicit zeros are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

/// Borrowed view over one row of a [`FeatureMatrix`].
#[derive(Debug, Clone, Copy)]
pub struct SparseRow<'a> {
    pub indices: &'a [usize],
    pub values: &'a [f64],
}

impl<'a> SparseRow<'a> {
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Value at `col`, zero when absent.
    pub fn get(&self, col: usize) -> f64 {
        match self.indices.binary_search(&col) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// Dot product against a dense weight vector.
    pub fn dot(&self, weights: &[f64]) -> f64 {
        self.iter()
            .map(|(col, value)| weights.get(col).copied().unwrap_or(0.0) * value)
            .sum()
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }
}

impl FeatureMatrix {
    /// Empty matrix with a fixed number of columns.
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            indptr: vec![0],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build a matrix from dense rows. Every row must have the same width.
    pub fn from_dense(rows: &[Vec<f64>]) -> TwResult<Self> {
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut matrix = Self::new(n_cols);
        for row in rows {
            if row.len() != n_cols {
                return Err(TwError::Validation(format!(
                    "dense row has {} columns, expected {}",
                    row.len(),
                    n_cols
                )));
            }
            matrix.push_row(row.iter().copied().enumerate())?;
        }
        Ok(matrix)
    }

    /// Append a row given as `(column, value)` pairs in any order.
    /// Duplicate columns are summed.
    pub fn push_row<I>(&mut self, entries: I) -> TwResult<()>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut entries: Vec<(usize, f64)> = entries.into_iter().collect();
        entries.sort_by_key(|(col, _)| *col);

        let mut last: Option<usize> = None;
        for (col, value) in entries {
            if col >= self.n_cols {
                return Err(TwError::Validation(format!(
                    "column {} out of bounds for matrix with {} columns",
                    col, self.n_cols
                )));
            }
            if last == Some(col) {
                if let Some(v) = self.values.last_mut() {
                    *v += value;
                }
                continue;
            }
            if value == 0.0 {
                continue;
            }
            self.indices.push(col);
            self.values.push(value);
            last = Some(col);
        }
        self.indptr.push(self.indices.len());
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn row(&self, i: usize) -> SparseRow<'_> {
        let start = self.indptr[i];
        let end = self.indptr[i + 1];
        SparseRow {
            indices: &self.indices[start..end],
            values: &self.values[start..end],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.row(row).get(col)
    }

    pub fn rows(&self) -> impl Iterator<Item = SparseRow<'_>> {
        (0..self.n_rows()).map(move |i| self.row(i))
    }

    /// New matrix made of the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut out = Self::new(self.n_cols);
        for &i in rows {
            let row = self.row(i);
            out.indices.extend_from_slice(row.indices);
            out.values.extend_from_slice(row.values);
            out.indptr.push(out.indices.len());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_row_sorts_and_merges() {
        let mut m = FeatureMatrix::new(4);
        m.push_row(vec![(3, 1.0), (0, 2.0), (3, 0.5)]).unwrap();
        m.push_row(vec![(1, 0.0)]).unwrap();

        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.row(0).indices, &[0, 3]);
        assert_eq!(m.get(0, 3), 1.5);
        assert_eq!(m.row(1).nnz(), 0);
    }

    #[test]
    fn out_of_bounds_column_rejected() {
        let mut m = FeatureMatrix::new(2);
        assert!(m.push_row(vec![(2, 1.0)]).is_err());
    }

    #[test]
    fn dense_round_trip_and_selection() {
        let m = FeatureMatrix::from_dense(&[vec![1.0, 0.0], vec![0.0, 2.0], vec![3.0, 4.0]])
            .unwrap();
        assert_eq!(m.nnz(), 4);

        let picked = m.select_rows(&[2, 0, 2]);
        assert_eq!(picked.n_rows(), 3);
        assert_eq!(picked.get(0, 1), 4.0);
        assert_eq!(picked.get(1, 0), 1.0);
        assert_eq!(picked.row(0).dot(&[1.0, 1.0]), 7.0);
    }

    #[test]
    fn ragged_dense_rows_rejected() {
        assert!(FeatureMatrix::from_dense(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
