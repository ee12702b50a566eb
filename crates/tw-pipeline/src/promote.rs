//! Retrain the best search trials, pick the best on the test split and
//! promote it to the registry's champion alias.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use tw_data::{ArtifactStore, Dataset, Split, VECTORIZER_FILE};
use tw_models::{rmse, DictVectorizer, ForestParams, Model, ModelBundle, RandomForestRegressor, Regressor};
use tw_tracking::{ModelVersion, Run, RunQuery, RunStatus, TrackingStore};
use tw_types::{SearchError, TrackingError, TwResult};

use crate::config::PipelineConfig;
use crate::hpo::{forest_params_from, FOREST_PARAMS};
use crate::recorder::LOSS_METRIC;

pub const DEFAULT_TOP_N: usize = 5;
pub const VAL_METRIC: &str = "val_rmse";
pub const TEST_METRIC: &str = "test_rmse";
pub const MODEL_ARTIFACT_DIR: &str = "model";
pub const MODEL_FILE: &str = "model.json";
pub const SOURCE_RUN_TAG: &str = "tripwise.sourceRunId";

/// Integer value of a logged parameter; `"12"` and `"12.0"` both give 12.
pub fn coerce_int(parameter: &str, raw: &str) -> TwResult<i64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v.trunc() as i64),
        _ => Err(SearchError::NonNumericParameter {
            parameter: parameter.to_string(),
            value: raw.to_string(),
        }
        .into()),
    }
}

/// Forest parameters logged on a search run.
pub fn params_from_run(run: &Run) -> TwResult<ForestParams> {
    forest_params_from(|name| {
        let raw = run
            .param(name)
            .ok_or_else(|| SearchError::MissingParameter { parameter: name.to_string() })?;
        coerce_int(name, raw)
    })
}

pub(crate) fn params_map(params: &ForestParams) -> BTreeMap<String, String> {
    let value = |name: &str| -> String {
        match name {
            "max_depth" => params.max_depth.map_or("None".to_string(), |d| d.to_string()),
            "n_estimators" => params.n_estimators.to_string(),
            "min_samples_split" => params.min_samples_split.to_string(),
            "min_samples_leaf" => params.min_samples_leaf.to_string(),
            _ => params.random_state.map_or("None".to_string(), |s| s.to_string()),
        }
    };
    FOREST_PARAMS.iter().map(|name| (name.to_string(), value(name))).collect()
}

/// Prepared splits and the vectorizer they were built with.
struct PreparedData {
    artifacts: ArtifactStore,
    train: Dataset,
    val: Dataset,
    test: Dataset,
    vectorizer: DictVectorizer,
}

impl PreparedData {
    fn load(data_path: &Path) -> TwResult<Self> {
        let artifacts = ArtifactStore::new(data_path);
        Ok(Self {
            train: artifacts.load_split(Split::Train)?,
            val: artifacts.load_split(Split::Val)?,
            test: artifacts.load_split(Split::Test)?,
            vectorizer: artifacts.load_vectorizer()?,
            artifacts,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    /// Retrained runs logged in the best-models experiment, in search order.
    pub retrained_runs: Vec<String>,
    pub champion_run_id: String,
    pub test_rmse: f64,
    pub version: ModelVersion,
}

/// Retrain one search run and log it, with its bundle and vectorizer, in the
/// best-models experiment.
fn train_and_log_model(
    config: &PipelineConfig,
    store: &TrackingStore,
    experiment: &tw_tracking::ExperimentHandle,
    data: &PreparedData,
    source: &Run,
) -> TwResult<String> {
    let params = params_from_run(source)?;
    let run_id = store.start_run(experiment, &source.info.run_name, None)?;

    let logged = (|| -> TwResult<()> {
        store.set_tag(&run_id, SOURCE_RUN_TAG, source.run_id())?;
        store.log_params(&run_id, &params_map(&params))?;

        let mut forest = RandomForestRegressor::new(params);
        forest.fit(&data.train.features, &data.train.target)?;
        let val_rmse = rmse(&data.val.target, &forest.predict(&data.val.features)?)?;
        store.log_metric(&run_id, VAL_METRIC, val_rmse)?;
        let test_rmse = rmse(&data.test.target, &forest.predict(&data.test.features)?)?;
        store.log_metric(&run_id, TEST_METRIC, test_rmse)?;

        let staged = config.cache_dir.join("staging").join(format!("{run_id}.json"));
        ModelBundle::new(data.vectorizer.clone(), Model::RandomForest(forest)).save(&staged)?;
        store.log_artifact(&run_id, &staged, &format!("{MODEL_ARTIFACT_DIR}/{MODEL_FILE}"))?;
        std::fs::remove_file(&staged)?;
        store.log_artifact(&run_id, data.artifacts.vectorizer_path(), VECTORIZER_FILE)?;

        info!(
            "Retrained {} as run {}: val_rmse={:.4} test_rmse={:.4}",
            source.info.run_name, run_id, val_rmse, test_rmse
        );
        Ok(())
    })();

    match logged {
        Ok(()) => {
            store.end_run(&run_id, RunStatus::Finished)?;
            Ok(run_id)
        }
        Err(e) => {
            store.end_run(&run_id, RunStatus::Failed)?;
            Err(e)
        }
    }
}

/// Promote the best of the top `top_n` search trials to the champion alias.
pub fn run_register_model(config: &PipelineConfig, data_path: &Path, top_n: usize) -> TwResult<PromotionOutcome> {
    let store = config.tracking_store()?;
    let registry = config.registry()?;

    let search = store.experiment_handle(&config.hpo_experiment)?;
    let candidates = store.search_runs(
        &search,
        &RunQuery::new()
            .children_only()
            .order_by_metric(LOSS_METRIC, true)
            .max_results(top_n),
    )?;
    if candidates.is_empty() {
        return Err(TrackingError::NoRuns {
            experiment: config.hpo_experiment.clone(),
        }
        .into());
    }
    if candidates.len() < top_n {
        warn!(
            "Only {} scored runs in '{}', fewer than the requested {}",
            candidates.len(),
            config.hpo_experiment,
            top_n
        );
    }

    let data = PreparedData::load(data_path)?;
    let best_models = store.get_or_create_experiment(&config.best_models_experiment)?;
    let mut retrained_runs = Vec::with_capacity(candidates.len());
    for run in &candidates {
        retrained_runs.push(train_and_log_model(config, &store, &best_models, &data, run)?);
    }

    let ranked = store.search_runs(
        &best_models,
        &RunQuery::new().order_by_metric(TEST_METRIC, true).max_results(top_n),
    )?;
    let winner = ranked.first().ok_or_else(|| TrackingError::NoRuns {
        experiment: config.best_models_experiment.clone(),
    })?;
    let test_rmse = winner.metric(TEST_METRIC).unwrap_or(f64::NAN);
    info!("Best model run {} with test_rmse {:.4}", winner.run_id(), test_rmse);

    let source = format!("runs:/{}/{}", winner.run_id(), MODEL_ARTIFACT_DIR);
    let version = registry.register_model(&source, &config.model_name)?;
    registry.set_alias(&config.model_name, &config.champion_alias, version.version)?;
    let description = format!(
        "The model was promoted to {} on {}",
        config.champion_alias,
        Utc::now().date_naive().format("%Y-%m-%d")
    );
    let version = registry.update_model_version(&config.model_name, version.version, &description)?;
    info!("{} version {} is now {}", version.name, version.version, config.champion_alias);

    Ok(PromotionOutcome {
        retrained_runs,
        champion_run_id: winner.run_id().to_string(),
        test_rmse,
        version,
    })
}
