//! Trial tracking and search run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::{Configuration, SearchSpace};

/// Unique search run identifier.
pub type SearchId = Uuid;

/// Which search strategy drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    Tpe,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "tpe" => Ok(Self::Tpe),
            other => Err(format!("unknown search strategy '{other}'")),
        }
    }
}

/// Top-level configuration for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub id: SearchId,
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    pub strategy: StrategyKind,

    /// Number of trials to run. The driver runs exactly this many.
    pub max_trials: usize,

    /// Seed for every random draw the strategy makes.
    pub seed: u64,

    /// Metric name the objective returns (e.g. "rmse").
    pub objective_metric: String,

    pub created_at: DateTime<Utc>,
}

impl SearchConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace, strategy: StrategyKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            search_space,
            strategy,
            max_trials: 15,
            seed: 42,
            objective_metric: "rmse".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_objective(mut self, metric: &str) -> Self {
        self.objective_metric = metric.to_string();
        self
    }
}

/// Lifecycle state for a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub id: SearchId,
    pub config: SearchConfig,
    pub state: SearchState,
    pub trials_completed: usize,
    pub best_trial: Option<Trial>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchStatus {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: SearchState::Pending,
            trials_completed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = SearchState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = SearchState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = SearchState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Replace the best trial only on a strictly lower loss, so the first
    /// trial reaching the minimum is kept.
    pub fn update_best(&mut self, trial: &Trial) {
        let Some(loss) = trial.loss else {
            return;
        };
        let improves = match self.best_trial.as_ref().and_then(|t| t.loss) {
            None => true,
            Some(best) => loss < best,
        };
        if improves {
            self.best_trial = Some(trial.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial: one configuration scored by the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub search_id: SearchId,
    /// Sequential trial number, starting at 0.
    pub tid: usize,
    pub configuration: Configuration,
    pub status: TrialStatus,
    pub loss: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(search_id: SearchId, tid: usize, configuration: Configuration) -> Self {
        Self {
            search_id,
            tid,
            configuration,
            status: TrialStatus::Pending,
            loss: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, loss: f64) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.loss = Some(loss);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.finished_at?;
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// The ordered history of a search run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trials {
    trials: Vec<Trial>,
}

impl Trials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, trial: Trial) {
        self.trials.push(trial);
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter()
    }

    pub fn losses(&self) -> Vec<f64> {
        self.trials.iter().filter_map(|t| t.loss).collect()
    }

    /// The completed trial with the lowest loss; the earliest one wins ties.
    pub fn best(&self) -> Option<&Trial> {
        let mut best: Option<&Trial> = None;
        for trial in &self.trials {
            let Some(loss) = trial.loss else { continue };
            match best.and_then(|b| b.loss) {
                Some(current) if loss >= current => {}
                _ => best = Some(trial),
            }
        }
        best
    }
}

impl<'a> IntoIterator for &'a Trials {
    type Item = &'a Trial;
    type IntoIter = std::slice::Iter<'a, Trial>;

    fn into_iter(self) -> Self::IntoIter {
        self.trials.iter()
    }
}
