//! Pipeline configuration shared by every entry point.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tw_data::{default_data_dir, render_pattern, validate_pattern, ObjectStore};
use tw_tracking::{ModelRegistry, TrackingStore};
use tw_types::{config_error, DataError, TwResult};

pub const HPO_EXPERIMENT: &str = "duration-prediction-hyperopt";
pub const BEST_MODELS_EXPERIMENT: &str = "duration-prediction-best-models";
pub const BASELINE_EXPERIMENT: &str = "duration-prediction";
pub const MODEL_NAME: &str = "Duration-Prediction-Model";
pub const CHAMPION_ALIAS: &str = "Champion";
pub const PREDICTIONS_BUCKET: &str = "batch-predictions";

pub const DEFAULT_INPUT_PATTERN: &str =
    "https://d37ci6vzurychx.cloudfront.net/trip-data/yellow_tripdata_{year:04d}-{month:02d}.parquet";
pub const DEFAULT_OUTPUT_PATTERN: &str = "s3://best-practices/predictions_{month:02d}_{year:04d}.parquet";

pub const ENV_TRACKING_DIR: &str = "TRIPWISE_TRACKING_DIR";
pub const ENV_OBJECT_STORE_DIR: &str = "TRIPWISE_OBJECT_STORE_DIR";
pub const ENV_METRICS_DB: &str = "TRIPWISE_METRICS_DB";
pub const ENV_CACHE_DIR: &str = "TRIPWISE_CACHE_DIR";
pub const ENV_INPUT_PATTERN: &str = "INPUT_FILE_PATTERN";
pub const ENV_OUTPUT_PATTERN: &str = "OUTPUT_FILE_PATTERN";

/// Locations and names used by the pipelines. Built once at startup and
/// passed down by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub tracking_dir: PathBuf,
    pub object_store_dir: PathBuf,
    pub metrics_db: PathBuf,
    /// Downloaded inputs and staged artifacts.
    pub cache_dir: PathBuf,
    pub hpo_experiment: String,
    pub best_models_experiment: String,
    pub baseline_experiment: String,
    pub model_name: String,
    pub champion_alias: String,
    pub predictions_bucket: String,
    pub input_file_pattern: String,
    pub output_file_pattern: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_root(default_data_dir())
    }
}

impl PipelineConfig {
    /// Every store placed under `root`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            tracking_dir: root.join("mlruns"),
            object_store_dir: root.join("objects"),
            metrics_db: root.join("monitoring").join("tripwise.duckdb"),
            cache_dir: root.join("cache"),
            hpo_experiment: HPO_EXPERIMENT.to_string(),
            best_models_experiment: BEST_MODELS_EXPERIMENT.to_string(),
            baseline_experiment: BASELINE_EXPERIMENT.to_string(),
            model_name: MODEL_NAME.to_string(),
            champion_alias: CHAMPION_ALIAS.to_string(),
            predictions_bucket: PREDICTIONS_BUCKET.to_string(),
            input_file_pattern: DEFAULT_INPUT_PATTERN.to_string(),
            output_file_pattern: DEFAULT_OUTPUT_PATTERN.to_string(),
        }
    }

    /// Defaults overridden by the process environment, then validated.
    pub fn from_env() -> TwResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, then validated.
    pub fn from_lookup<F>(lookup: F) -> TwResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_TRACKING_DIR) {
            config.tracking_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_OBJECT_STORE_DIR) {
            config.object_store_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup(ENV_METRICS_DB) {
            config.metrics_db = PathBuf::from(db);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(pattern) = lookup(ENV_INPUT_PATTERN) {
            config.input_file_pattern = pattern;
        }
        if let Some(pattern) = lookup(ENV_OUTPUT_PATTERN) {
            config.output_file_pattern = pattern;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TwResult<()> {
        let names = [
            ("hpo_experiment", &self.hpo_experiment),
            ("best_models_experiment", &self.best_models_experiment),
            ("baseline_experiment", &self.baseline_experiment),
            ("model_name", &self.model_name),
            ("champion_alias", &self.champion_alias),
            ("predictions_bucket", &self.predictions_bucket),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(config_error!("{} must not be empty", field));
            }
        }
        if self.hpo_experiment == self.best_models_experiment {
            return Err(config_error!(
                "search and best-model experiments must differ, both are '{}'",
                self.hpo_experiment
            ));
        }
        for (field, path) in [
            ("tracking_dir", &self.tracking_dir),
            ("object_store_dir", &self.object_store_dir),
            ("metrics_db", &self.metrics_db),
            ("cache_dir", &self.cache_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(config_error!("{} must not be empty", field));
            }
        }
        validate_pattern(ENV_INPUT_PATTERN, &self.input_file_pattern)?;
        validate_pattern(ENV_OUTPUT_PATTERN, &self.output_file_pattern)?;
        Ok(())
    }

    pub fn input_path(&self, year: i32, month: u32) -> String {
        render_pattern(&self.input_file_pattern, year, month)
    }

    pub fn output_path(&self, year: i32, month: u32) -> String {
        render_pattern(&self.output_file_pattern, year, month)
    }

    /// `models:/<name>@<alias>` for the promoted model.
    pub fn champion_uri(&self) -> String {
        format!("models:/{}@{}", self.model_name, self.champion_alias)
    }

    pub fn tracking_store(&self) -> TwResult<TrackingStore> {
        TrackingStore::new(&self.tracking_dir)
    }

    pub fn registry(&self) -> TwResult<ModelRegistry> {
        ModelRegistry::new(&self.tracking_dir)
    }

    pub fn object_store(&self) -> TwResult<ObjectStore> {
        Ok(ObjectStore::new(&self.object_store_dir).map_err(DataError::from)?)
    }
}
