//! A vectorizer and a model serialized together as one artifact.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use tw_types::{DataError, TwResult};

use crate::vectorizer::{DictVectorizer, FeatureDict};
use crate::{Model, Regressor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub vectorizer: DictVectorizer,
    pub model: Model,
}

impl ModelBundle {
    pub fn new(vectorizer: DictVectorizer, model: Model) -> Self {
        Self { vectorizer, model }
    }

    /// Vectorize and score raw feature dictionaries.
    pub fn predict_dicts(&self, dicts: &[FeatureDict]) -> TwResult<Vec<f64>> {
        let x = self.vectorizer.transform(dicts)?;
        self.model.predict(&x)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> TwResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        info!("Saved {} bundle to {}", self.model.name(), path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> TwResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::ArtifactNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let file = std::fs::File::open(path)?;
        let bundle: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::LinearRegression;
    use crate::vectorizer::FeatureValue;
    use tempfile::tempdir;

    #[test]
    fn bundle_save_load_predict() {
        let dicts: Vec<FeatureDict> = ["1", "2", "1", "2"]
            .iter()
            .map(|pu| {
                let mut d = FeatureDict::new();
                d.insert("PULocationID".into(), FeatureValue::from(*pu));
                d
            })
            .collect();
        let y = vec![5.0, 9.0, 5.0, 9.0];

        let mut dv = DictVectorizer::new();
        let x = dv.fit_transform(&dicts).unwrap();
        let mut model = Model::Linear(LinearRegression::new());
        model.fit(&x, &y).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        ModelBundle::new(dv, model).save(&path).unwrap();

        let loaded = ModelBundle::load(&path).unwrap();
        let pred = loaded.predict_dicts(&dicts[..2]).unwrap();
        assert!((pred[0] - 5.0).abs() < 1e-3);
        assert!((pred[1] - 9.0).abs() < 1e-3);
    }

    #[test]
    fn missing_bundle_is_artifact_not_found() {
        let err = ModelBundle::load("/definitely/not/here/model.json").unwrap_err();
        assert!(matches!(
            err,
            tw_types::TwError::Data(DataError::ArtifactNotFound { .. })
        ));
    }
}
