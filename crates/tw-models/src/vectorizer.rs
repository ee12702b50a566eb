//! Turns feature dictionaries into sparse rows.
//!
//! String values are one-hot encoded as `name=value` columns, numeric values
//! keep a single `name` column. Column order is the sorted feature name order
//! seen during `fit`; unseen features are ignored at transform time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use tw_types::{FeatureMatrix, ModelError, TwResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Num(f64),
    Str(String),
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Num(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

pub type FeatureDict = BTreeMap<String, FeatureValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictVectorizer {
    pub separator: String,
    feature_names: Vec<String>,
    vocabulary: BTreeMap<String, usize>,
}

impl Default for DictVectorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DictVectorizer {
    pub fn new() -> Self {
        Self {
            separator: "=".to_string(),
            feature_names: Vec::new(),
            vocabulary: BTreeMap::new(),
        }
    }

    fn column_name(&self, key: &str, value: &FeatureValue) -> String {
        match value {
            FeatureValue::Num(_) => key.to_string(),
            FeatureValue::Str(s) => format!("{key}{}{s}", self.separator),
        }
    }

    pub fn fit(&mut self, dicts: &[FeatureDict]) -> &mut Self {
        let mut names = BTreeSet::new();
        for dict in dicts {
            for (k, v) in dict {
                names.insert(self.column_name(k, v));
            }
        }
        self.feature_names = names.into_iter().collect();
        self.vocabulary = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        self
    }

    pub fn transform(&self, dicts: &[FeatureDict]) -> TwResult<FeatureMatrix> {
        if self.feature_names.is_empty() {
            return Err(ModelError::NotFitted.into());
        }
        let mut matrix = FeatureMatrix::new(self.feature_names.len());
        for dict in dicts {
            let entries = dict.iter().filter_map(|(k, v)| {
                let col = *self.vocabulary.get(&self.column_name(k, v))?;
                match v {
                    FeatureValue::Num(x) if x.is_finite() => Some((col, *x)),
                    FeatureValue::Num(_) => None,
                    FeatureValue::Str(_) => Some((col, 1.0)),
                }
            });
            matrix.push_row(entries)?;
        }
        Ok(matrix)
    }

    pub fn fit_transform(&mut self, dicts: &[FeatureDict]) -> TwResult<FeatureMatrix> {
        self.fit(dicts);
        self.transform(dicts)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, FeatureValue)]) -> FeatureDict {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn one_hot_and_numeric_columns() {
        let data = vec![
            dict(&[("PU_DO", "1_2".into()), ("trip_distance", 3.5.into())]),
            dict(&[("PU_DO", "7_7".into()), ("trip_distance", 1.0.into())]),
        ];
        let mut dv = DictVectorizer::new();
        let x = dv.fit_transform(&data).unwrap();

        assert_eq!(dv.feature_names(), &["PU_DO=1_2", "PU_DO=7_7", "trip_distance"]);
        assert_eq!(x.get(0, 0), 1.0);
        assert_eq!(x.get(0, 1), 0.0);
        assert_eq!(x.get(0, 2), 3.5);
        assert_eq!(x.get(1, 1), 1.0);
    }

    #[test]
    fn unseen_categories_are_dropped() {
        let mut dv = DictVectorizer::new();
        dv.fit(&[dict(&[("PULocationID", "1".into())])]);
        let x = dv
            .transform(&[dict(&[("PULocationID", "99".into())])])
            .unwrap();
        assert_eq!(x.n_rows(), 1);
        assert_eq!(x.row(0).nnz(), 0);
    }

    #[test]
    fn transform_before_fit_fails() {
        let dv = DictVectorizer::new();
        assert!(dv.transform(&[FeatureDict::new()]).is_err());
    }

    #[test]
    fn serde_keeps_vocabulary() {
        let mut dv = DictVectorizer::new();
        dv.fit(&[dict(&[("a", "x".into()), ("b", 2.0.into())])]);
        let json = serde_json::to_string(&dv).unwrap();
        let back: DictVectorizer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dv);
    }
}
