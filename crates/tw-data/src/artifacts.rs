//! Prepared feature matrices and vectorizers stored under one data path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tw_models::DictVectorizer;
use tw_types::{DataError, FeatureMatrix, ModelError, TwResult};

pub const VECTORIZER_FILE: &str = "dv.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Train => "train.json",
            Self::Val => "val.json",
            Self::Test => "test.json",
        }
    }
}

/// Features and labels of one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub features: FeatureMatrix,
    pub target: Vec<f64>,
}

impl Dataset {
    pub fn new(features: FeatureMatrix, target: Vec<f64>) -> TwResult<Self> {
        if features.n_rows() != target.len() {
            return Err(ModelError::ShapeMismatch {
                what: "labels".to_string(),
                expected: features.n_rows(),
                actual: target.len(),
            }
            .into());
        }
        Ok(Self { features, target })
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

/// Reads and writes the artifacts produced by feature preparation.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_path: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(data_path: P) -> Self {
        Self {
            data_path: data_path.as_ref().to_path_buf(),
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn split_path(&self, split: Split) -> PathBuf {
        self.data_path.join(split.file_name())
    }

    pub fn vectorizer_path(&self) -> PathBuf {
        self.data_path.join(VECTORIZER_FILE)
    }

    pub fn load_split(&self, split: Split) -> TwResult<Dataset> {
        let dataset: Dataset = read_artifact(&self.split_path(split))?;
        Dataset::new(dataset.features, dataset.target)
    }

    pub fn save_split(&self, split: Split, dataset: &Dataset) -> TwResult<()> {
        write_artifact(&self.split_path(split), dataset)
    }

    pub fn load_vectorizer(&self) -> TwResult<DictVectorizer> {
        read_artifact(&self.vectorizer_path())
    }

    pub fn save_vectorizer(&self, vectorizer: &DictVectorizer) -> TwResult<()> {
        write_artifact(&self.vectorizer_path(), vectorizer)
    }
}

fn read_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> TwResult<T> {
    if !path.exists() {
        return Err(DataError::ArtifactNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let file = std::fs::File::open(path)?;
    let value = serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| DataError::InvalidFormat {
        message: format!("{}: {}", path.display(), e),
    })?;
    tracing::debug!("Loaded artifact {}", path.display());
    Ok(value)
}

fn write_artifact<T: Serialize>(path: &Path, value: &T) -> TwResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), value)?;
    tracing::debug!("Wrote artifact {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn split_round_trip_and_missing_artifacts() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("output"));

        assert!(matches!(
            store.load_split(Split::Train).unwrap_err(),
            tw_types::TwError::Data(DataError::ArtifactNotFound { .. })
        ));

        let x = FeatureMatrix::from_dense(&[vec![1.0, 0.0], vec![0.0, 2.0]]).unwrap();
        let ds = Dataset::new(x, vec![3.0, 4.0]).unwrap();
        store.save_split(Split::Train, &ds).unwrap();
        assert_eq!(store.load_split(Split::Train).unwrap(), ds);
    }

    #[test]
    fn label_count_must_match_rows() {
        let x = FeatureMatrix::from_dense(&[vec![1.0]]).unwrap();
        assert!(Dataset::new(x, vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn corrupt_artifact_is_invalid_format() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        std::fs::write(store.vectorizer_path(), b"not json").unwrap();
        assert!(matches!(
            store.load_vectorizer().unwrap_err(),
            tw_types::TwError::Data(DataError::InvalidFormat { .. })
        ));
    }
}
