//! Experiment and run tracking backed by a directory of JSON records.
//!
//! Layout under the tracking root:
//!
//! ```text
//! experiments/<experiment_id>.json
//! runs/<run_id>.json
//! artifacts/<run_id>/<artifact path>
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use tw_types::{TrackingError, TwResult};

pub type ExperimentId = String;
pub type RunId = String;

/// Tag key linking a child run to its parent.
pub const PARENT_RUN_TAG: &str = "tripwise.parentRunId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub lifecycle_stage: LifecycleStage,
    pub creation_time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

/// An experiment resolved once by name, passed to every run operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentHandle {
    pub experiment_id: ExperimentId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub run_name: String,
    pub experiment_id: ExperimentId,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub lifecycle_stage: LifecycleStage,
    pub parent_run_id: Option<RunId>,
    /// Creation order within the store.
    pub sequence: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    /// Latest value per metric key.
    pub metrics: BTreeMap<String, Metric>,
    pub params: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    /// Artifact paths relative to the run's artifact directory.
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub info: RunInfo,
    pub data: RunData,
}

impl Run {
    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.data.metrics.get(key).map(|m| m.value)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.data.params.get(key).map(String::as_str)
    }

    pub fn is_child(&self) -> bool {
        self.info.parent_run_id.is_some()
    }
}

/// Which runs a search considers by nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nesting {
    #[default]
    Any,
    ChildrenOnly,
}

/// Run search parameters.
///
/// Only active runs are returned. When ordering by a metric, runs that never
/// logged it are excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunQuery {
    pub order_by: Option<(String, bool)>,
    pub max_results: Option<usize>,
    pub nesting: Nesting,
}

impl RunQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by_metric(mut self, metric: &str, ascending: bool) -> Self {
        self.order_by = Some((metric.to_string(), ascending));
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn children_only(mut self) -> Self {
        self.nesting = Nesting::ChildrenOnly;
        self
    }
}

/// Tracking store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct TrackingStore {
    root: PathBuf,
}

impl TrackingStore {
    pub fn new<P: AsRef<Path>>(root: P) -> TwResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("experiments"))?;
        std::fs::create_dir_all(root.join("runs"))?;
        std::fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn experiment_path(&self, id: &str) -> PathBuf {
        self.root.join("experiments").join(format!("{id}.json"))
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    /// Directory holding a run's artifacts.
    pub fn artifact_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("artifacts").join(run_id)
    }

    // ---- experiments ----

    pub fn list_experiments(&self) -> TwResult<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> = read_dir_json(&self.root.join("experiments"))?;
        experiments.sort_by_key(|e| e.experiment_id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(experiments)
    }

    pub fn get_experiment_by_name(&self, name: &str) -> TwResult<Option<Experiment>> {
        Ok(self
            .list_experiments()?
            .into_iter()
            .find(|e| e.name == name && e.lifecycle_stage == LifecycleStage::Active))
    }

    pub fn create_experiment(&self, name: &str, tags: BTreeMap<String, String>) -> TwResult<ExperimentHandle> {
        let existing = self.list_experiments()?;
        if existing.iter().any(|e| e.name == name) {
            return Err(TrackingError::ExperimentExists { name: name.to_string() }.into());
        }
        let next_id = existing
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .map_or(0, |m| m + 1);

        let experiment = Experiment {
            experiment_id: next_id.to_string(),
            name: name.to_string(),
            lifecycle_stage: LifecycleStage::Active,
            creation_time: Utc::now(),
            tags,
        };
        write_json(&self.experiment_path(&experiment.experiment_id), &experiment)?;
        info!("Created experiment '{}' (id {})", name, experiment.experiment_id);
        Ok(ExperimentHandle {
            experiment_id: experiment.experiment_id,
            name: experiment.name,
        })
    }

    /// Resolve an existing experiment, failing with `ExperimentNotFound`.
    pub fn experiment_handle(&self, name: &str) -> TwResult<ExperimentHandle> {
        match self.get_experiment_by_name(name)? {
            Some(e) => Ok(ExperimentHandle {
                experiment_id: e.experiment_id,
                name: e.name,
            }),
            None => Err(TrackingError::ExperimentNotFound { name: name.to_string() }.into()),
        }
    }

    pub fn get_or_create_experiment(&self, name: &str) -> TwResult<ExperimentHandle> {
        match self.get_experiment_by_name(name)? {
            Some(e) => Ok(ExperimentHandle {
                experiment_id: e.experiment_id,
                name: e.name,
            }),
            None => self.create_experiment(name, BTreeMap::new()),
        }
    }

    pub fn set_experiment_tag(&self, handle: &ExperimentHandle, key: &str, value: &str) -> TwResult<()> {
        let path = self.experiment_path(&handle.experiment_id);
        let mut experiment: Experiment = read_json(&path).map_err(|_| TrackingError::ExperimentNotFound {
            name: handle.name.clone(),
        })?;
        experiment.tags.insert(key.to_string(), value.to_string());
        write_json(&path, &experiment)
    }

    // ---- runs ----

    pub fn start_run(&self, handle: &ExperimentHandle, run_name: &str, parent_run_id: Option<&str>) -> TwResult<RunId> {
        if let Some(parent) = parent_run_id {
            self.get_run(parent)?;
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let sequence = std::fs::read_dir(self.root.join("runs"))?.count() as u64;
        let mut data = RunData::default();
        data.tags.insert("tripwise.runName".to_string(), run_name.to_string());
        if let Some(parent) = parent_run_id {
            data.tags.insert(PARENT_RUN_TAG.to_string(), parent.to_string());
        }

        let run = Run {
            info: RunInfo {
                run_id: run_id.clone(),
                run_name: run_name.to_string(),
                experiment_id: handle.experiment_id.clone(),
                status: RunStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                lifecycle_stage: LifecycleStage::Active,
                parent_run_id: parent_run_id.map(str::to_string),
                sequence,
            },
            data,
        };
        write_json(&self.run_path(&run_id), &run)?;
        debug!("Started run {} '{}' in experiment {}", run_id, run_name, handle.name);
        Ok(run_id)
    }

    pub fn get_run(&self, run_id: &str) -> TwResult<Run> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(TrackingError::RunNotFound { run_id: run_id.to_string() }.into());
        }
        read_json(&path)
    }

    fn update_run<F>(&self, run_id: &str, update: F) -> TwResult<()>
    where
        F: FnOnce(&mut Run),
    {
        let mut run = self.get_run(run_id)?;
        if run.info.status != RunStatus::Running {
            return Err(TrackingError::RunNotActive { run_id: run_id.to_string() }.into());
        }
        update(&mut run);
        write_json(&self.run_path(run_id), &run)
    }

    pub fn log_param(&self, run_id: &str, key: &str, value: impl ToString) -> TwResult<()> {
        let value = value.to_string();
        self.update_run(run_id, |run| {
            run.data.params.insert(key.to_string(), value);
        })
    }

    pub fn log_params<'a, I, V>(&self, run_id: &str, params: I) -> TwResult<()>
    where
        I: IntoIterator<Item = (&'a String, V)>,
        V: ToString,
    {
        let params: Vec<(String, String)> = params.into_iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
        self.update_run(run_id, |run| {
            run.data.params.extend(params);
        })
    }

    pub fn log_metric(&self, run_id: &str, key: &str, value: f64) -> TwResult<()> {
        self.update_run(run_id, |run| {
            let step = run.data.metrics.get(key).map_or(0, |m| m.step + 1);
            run.data.metrics.insert(
                key.to_string(),
                Metric {
                    key: key.to_string(),
                    value,
                    timestamp: Utc::now(),
                    step,
                },
            );
        })
    }

    pub fn set_tag(&self, run_id: &str, key: &str, value: &str) -> TwResult<()> {
        self.update_run(run_id, |run| {
            run.data.tags.insert(key.to_string(), value.to_string());
        })
    }

    /// Copy a local file into the run's artifacts under `artifact_path`.
    pub fn log_artifact<P: AsRef<Path>>(&self, run_id: &str, local_path: P, artifact_path: &str) -> TwResult<PathBuf> {
        let local_path = local_path.as_ref();
        let dest = self.artifact_dir(run_id).join(artifact_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local_path, &dest)?;
        let recorded = artifact_path.to_string();
        self.update_run(run_id, |run| {
            if !run.data.artifacts.contains(&recorded) {
                run.data.artifacts.push(recorded);
            }
        })?;
        debug!("Logged artifact {} for run {}", artifact_path, run_id);
        Ok(dest)
    }

    /// Absolute path of a run artifact, which must exist.
    pub fn artifact_path(&self, run_id: &str, artifact_path: &str) -> TwResult<PathBuf> {
        let path = self.artifact_dir(run_id).join(artifact_path);
        if !path.exists() {
            return Err(TrackingError::ArtifactNotFound {
                run_id: run_id.to_string(),
                path: artifact_path.to_string(),
            }
            .into());
        }
        Ok(path)
    }

    pub fn end_run(&self, run_id: &str, status: RunStatus) -> TwResult<()> {
        self.update_run(run_id, |run| {
            run.info.status = status;
            run.info.end_time = Some(Utc::now());
        })
    }

    /// Runs of one experiment filtered, ordered and truncated per `query`.
    /// Ties on the ordering metric keep creation order.
    pub fn search_runs(&self, handle: &ExperimentHandle, query: &RunQuery) -> TwResult<Vec<Run>> {
        let mut runs: Vec<Run> = read_dir_json::<Run>(&self.root.join("runs"))?
            .into_iter()
            .filter(|r| r.info.experiment_id == handle.experiment_id)
            .filter(|r| r.info.lifecycle_stage == LifecycleStage::Active)
            .filter(|r| match query.nesting {
                Nesting::Any => true,
                Nesting::ChildrenOnly => r.is_child(),
            })
            .collect();

        runs.sort_by_key(|r| r.info.sequence);

        if let Some((metric, ascending)) = &query.order_by {
            runs.retain(|r| r.metric(metric).is_some_and(f64::is_finite));
            runs.sort_by(|a, b| {
                let (x, y) = (a.metric(metric).unwrap_or(f64::NAN), b.metric(metric).unwrap_or(f64::NAN));
                if *ascending {
                    x.total_cmp(&y)
                } else {
                    y.total_cmp(&x)
                }
            });
        }

        if let Some(n) = query.max_results {
            runs.truncate(n);
        }
        Ok(runs)
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> TwResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> TwResult<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> TwResult<Vec<T>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            out.push(read_json(&path)?);
        }
    }
    Ok(out)
}
