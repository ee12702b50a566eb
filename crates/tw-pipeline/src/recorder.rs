//! Persists a hyperparameter search as a parent run with one child per trial.

use tracing::{debug, info};

use tw_optimizer::{SearchOutcome, Trial};
use tw_tracking::{ExperimentHandle, RunId, RunStatus, TrackingStore};
use tw_types::{SearchError, TwResult};

pub const PARENT_RUN_NAME: &str = "Random Forest Regressor";
pub const LOSS_METRIC: &str = "rmse";

pub fn child_run_name(tid: usize) -> String {
    format!("Combination{tid}")
}

/// Records trials of one search. The parent run stays open until
/// [`RunRecorder::finish`] or [`RunRecorder::fail`].
pub struct RunRecorder<'a> {
    store: &'a TrackingStore,
    experiment: ExperimentHandle,
    parent_run_id: RunId,
}

impl<'a> RunRecorder<'a> {
    /// Open the parent run in `experiment_name`, creating the experiment when
    /// absent.
    pub fn start(store: &'a TrackingStore, experiment_name: &str) -> TwResult<Self> {
        let experiment = store.get_or_create_experiment(experiment_name)?;
        let parent_run_id = store.start_run(&experiment, PARENT_RUN_NAME, None)?;
        info!("Recording search in '{}' under run {}", experiment.name, parent_run_id);
        Ok(Self {
            store,
            experiment,
            parent_run_id,
        })
    }

    pub fn experiment(&self) -> &ExperimentHandle {
        &self.experiment
    }

    pub fn parent_run_id(&self) -> &str {
        &self.parent_run_id
    }

    /// Log one scored trial as a finished child run.
    pub fn record_trial(&self, trial: &Trial) -> TwResult<RunId> {
        let loss = trial.loss.ok_or(SearchError::InvalidLoss {
            trial_id: trial.tid,
            loss: f64::NAN,
        })?;
        let run_id = self
            .store
            .start_run(&self.experiment, &child_run_name(trial.tid), Some(&self.parent_run_id))?;
        self.store.log_params(&run_id, &trial.configuration)?;
        self.store.log_metric(&run_id, LOSS_METRIC, loss)?;
        self.store.end_run(&run_id, RunStatus::Finished)?;
        debug!("Recorded trial {} as run {}", trial.tid, run_id);
        Ok(run_id)
    }

    /// Log every trial, then the best configuration and loss on the parent,
    /// and close the parent run.
    pub fn finish(self, outcome: &SearchOutcome) -> TwResult<RunId> {
        for trial in &outcome.trials {
            self.record_trial(trial)?;
        }
        if let Some(best) = outcome.best() {
            self.store.log_params(&self.parent_run_id, &best.configuration)?;
            if let Some(loss) = best.loss {
                self.store.log_metric(&self.parent_run_id, LOSS_METRIC, loss)?;
            }
        }
        self.store.end_run(&self.parent_run_id, RunStatus::Finished)?;
        Ok(self.parent_run_id)
    }

    /// Close the parent run as failed.
    pub fn fail(self, error: &str) -> TwResult<()> {
        self.store.set_tag(&self.parent_run_id, "tripwise.error", error)?;
        self.store.end_run(&self.parent_run_id, RunStatus::Failed)
    }
}
