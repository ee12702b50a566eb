//! Baseline forest fitted with fixed parameters, logged as a single run.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use tw_data::{ArtifactStore, Split};
use tw_models::{fit_and_score, ForestParams, Model, ModelBundle, RandomForestRegressor};
use tw_tracking::{ExperimentHandle, RunStatus, TrackingStore};
use tw_types::TwResult;

use crate::config::PipelineConfig;
use crate::promote::{params_map, MODEL_ARTIFACT_DIR, MODEL_FILE};
use crate::recorder::{LOSS_METRIC, PARENT_RUN_NAME};

pub const BASELINE_MAX_DEPTH: usize = 10;
pub const BASELINE_RANDOM_STATE: u64 = 0;
pub const VERSION_TAG: (&str, &str) = ("version", "v1");

pub fn baseline_params() -> ForestParams {
    ForestParams::default()
        .with_max_depth(BASELINE_MAX_DEPTH)
        .with_random_state(BASELINE_RANDOM_STATE)
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub run_id: String,
    pub rmse: f64,
}

/// The baseline experiment, created with its version tag when absent.
fn baseline_experiment(store: &TrackingStore, name: &str) -> TwResult<ExperimentHandle> {
    if store.get_experiment_by_name(name)?.is_some() {
        return store.experiment_handle(name);
    }
    let tags = BTreeMap::from([(VERSION_TAG.0.to_string(), VERSION_TAG.1.to_string())]);
    store.create_experiment(name, tags)
}

/// Fit the baseline forest on the train split, score it on validation and
/// log params, `rmse` and the model bundle.
pub fn run_train(config: &PipelineConfig, data_path: &Path) -> TwResult<TrainOutcome> {
    let artifacts = ArtifactStore::new(data_path);
    let train = artifacts.load_split(Split::Train)?;
    let val = artifacts.load_split(Split::Val)?;
    let vectorizer = artifacts.load_vectorizer()?;

    let store = config.tracking_store()?;
    let experiment = baseline_experiment(&store, &config.baseline_experiment)?;
    let run_id = store.start_run(&experiment, PARENT_RUN_NAME, None)?;

    let params = baseline_params();
    let logged = (|| -> TwResult<f64> {
        store.log_params(&run_id, &params_map(&params))?;
        let mut forest = RandomForestRegressor::new(params.clone());
        let rmse = fit_and_score(
            &mut forest,
            (&train.features, &train.target),
            (&val.features, &val.target),
        )?;
        store.log_metric(&run_id, LOSS_METRIC, rmse)?;

        let staged = config.cache_dir.join("staging").join(format!("{run_id}.json"));
        ModelBundle::new(vectorizer.clone(), Model::RandomForest(forest)).save(&staged)?;
        store.log_artifact(&run_id, &staged, &format!("{MODEL_ARTIFACT_DIR}/{MODEL_FILE}"))?;
        std::fs::remove_file(&staged)?;
        Ok(rmse)
    })();

    match logged {
        Ok(rmse) => {
            store.end_run(&run_id, RunStatus::Finished)?;
            info!("Baseline run {} finished with rmse {:.4}", run_id, rmse);
            Ok(TrainOutcome { run_id, rmse })
        }
        Err(e) => {
            store.end_run(&run_id, RunStatus::Failed)?;
            Err(e)
        }
    }
}
