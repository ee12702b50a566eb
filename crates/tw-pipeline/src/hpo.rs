//! Random-forest hyperparameter search recorded in the tracking store.

use std::path::Path;
use tracing::{error, info};

use tw_data::{ArtifactStore, Dataset, Split};
use tw_models::{fit_and_score, ForestParams, RandomForestRegressor};
use tw_optimizer::{Configuration, ParameterValue, SearchConfig, SearchDriver, SearchSpace, StrategyKind};
use tw_types::{validation_error, SearchError, TwResult};

use crate::config::PipelineConfig;
use crate::recorder::{RunRecorder, LOSS_METRIC};

pub const DEFAULT_NUM_TRIALS: usize = 15;
pub const SEARCH_SEED: u64 = 42;
pub const FOREST_RANDOM_STATE: i64 = 42;

/// The forest parameters read back from a run, in logging order.
pub const FOREST_PARAMS: [&str; 5] = [
    "max_depth",
    "n_estimators",
    "min_samples_split",
    "min_samples_leaf",
    "random_state",
];

pub fn forest_search_space() -> SearchSpace {
    SearchSpace::new()
        .add_int("max_depth", 1, 20)
        .add_int("n_estimators", 10, 50)
        .add_int("min_samples_split", 2, 10)
        .add_int("min_samples_leaf", 1, 4)
        .add_fixed("random_state", ParameterValue::Int(FOREST_RANDOM_STATE))
}

fn non_negative(name: &str, value: i64) -> TwResult<usize> {
    usize::try_from(value).map_err(|_| validation_error!("{} must be non-negative, got {}", name, value))
}

/// Forest parameters from integer-valued `values`, looked up by name.
pub fn forest_params_from<F>(mut value: F) -> TwResult<ForestParams>
where
    F: FnMut(&str) -> TwResult<i64>,
{
    let params = ForestParams::default()
        .with_max_depth(non_negative("max_depth", value("max_depth")?)?)
        .with_n_estimators(non_negative("n_estimators", value("n_estimators")?)?)
        .with_min_samples_split(non_negative("min_samples_split", value("min_samples_split")?)?)
        .with_min_samples_leaf(non_negative("min_samples_leaf", value("min_samples_leaf")?)?)
        .with_random_state(non_negative("random_state", value("random_state")?)? as u64);
    params.validate()?;
    Ok(params)
}

pub fn forest_params(configuration: &Configuration) -> TwResult<ForestParams> {
    forest_params_from(|name| {
        configuration
            .get(name)
            .map(ParameterValue::as_i64)
            .ok_or_else(|| SearchError::MissingParameter { parameter: name.to_string() }.into())
    })
}

/// Fit a forest with `configuration` on `train` and return its RMSE on `val`.
pub fn objective(configuration: &Configuration, train: &Dataset, val: &Dataset) -> TwResult<f64> {
    let mut forest = RandomForestRegressor::new(forest_params(configuration)?);
    fit_and_score(
        &mut forest,
        (&train.features, &train.target),
        (&val.features, &val.target),
    )
}

#[derive(Debug, Clone)]
pub struct HpoSummary {
    pub parent_run_id: String,
    pub trials: usize,
    pub best_tid: usize,
    pub best_rmse: f64,
    pub best_configuration: Configuration,
}

/// Run `num_trials` TPE trials over the forest space on the prepared data
/// in `data_path`, recording them under the search experiment.
pub fn run_optimization(config: &PipelineConfig, data_path: &Path, num_trials: usize) -> TwResult<HpoSummary> {
    let artifacts = ArtifactStore::new(data_path);
    let train = artifacts.load_split(Split::Train)?;
    let val = artifacts.load_split(Split::Val)?;
    info!(
        "Loaded {} training and {} validation rows from {}",
        train.len(),
        val.len(),
        data_path.display()
    );

    let search = SearchConfig::new(&config.hpo_experiment, forest_search_space(), StrategyKind::Tpe)
        .with_max_trials(num_trials)
        .with_seed(SEARCH_SEED)
        .with_objective(LOSS_METRIC);
    let mut driver = SearchDriver::new(search)?;

    let store = config.tracking_store()?;
    let recorder = RunRecorder::start(&store, &config.hpo_experiment)?;

    let outcome = match driver.run(|_, configuration| objective(configuration, &train, &val)) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Search aborted: {}", e);
            recorder.fail(&e.to_string())?;
            return Err(e);
        }
    };

    let best = outcome.best().cloned().ok_or(SearchError::EmptyBudget)?;
    let parent_run_id = recorder.finish(&outcome)?;
    let best_rmse = best.loss.unwrap_or(f64::NAN);
    info!("Best trial {} with rmse {:.4}: {:?}", best.tid, best_rmse, best.configuration);

    Ok(HpoSummary {
        parent_run_id,
        trials: outcome.trials.len(),
        best_tid: best.tid,
        best_rmse,
        best_configuration: best.configuration,
    })
}
