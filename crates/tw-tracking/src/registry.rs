//! Registered models, their versions and aliases.
//!
//! Each registered model is one JSON record under `<root>/models/`. Aliases
//! live in a single map on the model record, so an alias can point at no
//! more than one version at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use tw_types::{TrackingError, TwResult};

use crate::store::{read_json, write_json, RunId, TrackingStore};

/// A `runs:/` or `models:/` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelUri {
    /// `runs:/<run_id>/<artifact path>`
    Run { run_id: RunId, path: String },
    /// `models:/<name>/<version>`
    Version { name: String, version: u32 },
    /// `models:/<name>@<alias>`
    Alias { name: String, alias: String },
}

impl FromStr for ModelUri {
    type Err = TrackingError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let invalid = || TrackingError::InvalidModelUri { uri: uri.to_string() };

        if let Some(rest) = uri.strip_prefix("runs:/") {
            let (run_id, path) = rest.split_once('/').ok_or_else(invalid)?;
            if run_id.is_empty() || path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Run {
                run_id: run_id.to_string(),
                path: path.trim_end_matches('/').to_string(),
            });
        }

        let rest = uri.strip_prefix("models:/").ok_or_else(invalid)?;
        if let Some((name, alias)) = rest.split_once('@') {
            if name.is_empty() || alias.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Alias {
                name: name.to_string(),
                alias: alias.to_string(),
            });
        }
        let (name, version) = rest.rsplit_once('/').ok_or_else(invalid)?;
        let version = version.parse::<u32>().map_err(|_| invalid())?;
        if name.is_empty() {
            return Err(invalid());
        }
        Ok(Self::Version {
            name: name.to_string(),
            version,
        })
    }
}

impl std::fmt::Display for ModelUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run { run_id, path } => write!(f, "runs:/{run_id}/{path}"),
            Self::Version { name, version } => write!(f, "models:/{name}/{version}"),
            Self::Alias { name, alias } => write!(f, "models:/{name}@{alias}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub source: String,
    pub run_id: Option<RunId>,
    pub description: Option<String>,
    pub creation_time: DateTime<Utc>,
    /// Filled from the model's alias map when read.
    #[serde(default, skip_serializing)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub versions: Vec<ModelVersion>,
    pub aliases: BTreeMap<String, u32>,
}

impl RegisteredModel {
    fn view(&self, version: &ModelVersion) -> ModelVersion {
        let mut v = version.clone();
        v.aliases = self
            .aliases
            .iter()
            .filter(|(_, target)| **target == version.version)
            .map(|(alias, _)| alias.clone())
            .collect();
        v
    }

    fn find(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new<P: AsRef<Path>>(tracking_root: P) -> TwResult<Self> {
        let root = tracking_root.as_ref().join("models");
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Registry sharing the tracking store's root directory.
    pub fn for_store(store: &TrackingStore) -> TwResult<Self> {
        Self::new(store.root())
    }

    fn model_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn load(&self, name: &str) -> TwResult<RegisteredModel> {
        let path = self.model_path(name);
        if !path.exists() {
            return Err(TrackingError::ModelNotFound { name: name.to_string() }.into());
        }
        read_json(&path)
    }

    fn save(&self, model: &RegisteredModel) -> TwResult<()> {
        write_json(&self.model_path(&model.name), model)
    }

    pub fn get_registered_model(&self, name: &str) -> TwResult<RegisteredModel> {
        self.load(name)
    }

    /// Register `source` under `name`.
    ///
    /// Versions increase monotonically from 1. A `runs:/` source whose run
    /// already backs a version returns that version unchanged.
    pub fn register_model(&self, source: &str, name: &str) -> TwResult<ModelVersion> {
        let run_id = match source.parse::<ModelUri>()? {
            ModelUri::Run { run_id, .. } => Some(run_id),
            _ => None,
        };

        let now = Utc::now();
        let mut model = match self.load(name) {
            Ok(model) => model,
            Err(tw_types::TwError::Tracking(TrackingError::ModelNotFound { .. })) => {
                info!("Created registered model '{}'", name);
                RegisteredModel {
                    name: name.to_string(),
                    creation_time: now,
                    last_updated: now,
                    versions: Vec::new(),
                    aliases: BTreeMap::new(),
                }
            }
            Err(e) => return Err(e),
        };

        if let Some(existing) = model
            .versions
            .iter()
            .find(|v| run_id.is_some() && v.run_id == run_id && v.source == source)
        {
            info!(
                "Run {} already registered as {} version {}",
                run_id.as_deref().unwrap_or_default(),
                name,
                existing.version
            );
            return Ok(model.view(existing));
        }

        let version = model.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let entry = ModelVersion {
            name: name.to_string(),
            version,
            source: source.to_string(),
            run_id,
            description: None,
            creation_time: now,
            aliases: Vec::new(),
        };
        model.versions.push(entry.clone());
        model.last_updated = now;
        self.save(&model)?;
        info!("Registered {} version {} from {}", name, version, source);
        Ok(entry)
    }

    pub fn get_model_version(&self, name: &str, version: u32) -> TwResult<ModelVersion> {
        let model = self.load(name)?;
        model
            .find(version)
            .map(|v| model.view(v))
            .ok_or_else(|| TrackingError::VersionNotFound { name: name.to_string(), version }.into())
    }

    /// Point `alias` at `version`, moving it off any other version.
    pub fn set_alias(&self, name: &str, alias: &str, version: u32) -> TwResult<()> {
        let mut model = self.load(name)?;
        if model.find(version).is_none() {
            return Err(TrackingError::VersionNotFound { name: name.to_string(), version }.into());
        }
        let previous = model.aliases.insert(alias.to_string(), version);
        model.last_updated = Utc::now();
        self.save(&model)?;
        match previous {
            Some(old) if old != version => {
                info!("Moved alias {} of {} from version {} to {}", alias, name, old, version)
            }
            _ => info!("Set alias {} of {} to version {}", alias, name, version),
        }
        Ok(())
    }

    pub fn get_model_version_by_alias(&self, name: &str, alias: &str) -> TwResult<ModelVersion> {
        let model = self.load(name)?;
        let version = *model.aliases.get(alias).ok_or_else(|| TrackingError::AliasNotFound {
            name: name.to_string(),
            alias: alias.to_string(),
        })?;
        model
            .find(version)
            .map(|v| model.view(v))
            .ok_or_else(|| TrackingError::VersionNotFound { name: name.to_string(), version }.into())
    }

    pub fn update_model_version(&self, name: &str, version: u32, description: &str) -> TwResult<ModelVersion> {
        let mut model = self.load(name)?;
        let entry = model
            .versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| TrackingError::VersionNotFound { name: name.to_string(), version })?;
        entry.description = Some(description.to_string());
        let updated = entry.clone();
        model.last_updated = Utc::now();
        self.save(&model)?;
        Ok(model.view(&updated))
    }

    /// Resolve a `models:/` or `runs:/` uri to the local artifact path it
    /// refers to.
    pub fn resolve_artifact(&self, store: &TrackingStore, uri: &str) -> TwResult<PathBuf> {
        let version = match uri.parse::<ModelUri>()? {
            ModelUri::Run { run_id, path } => return store.artifact_path(&run_id, &path),
            ModelUri::Version { name, version } => self.get_model_version(&name, version)?,
            ModelUri::Alias { name, alias } => self.get_model_version_by_alias(&name, &alias)?,
        };
        match version.source.parse::<ModelUri>()? {
            ModelUri::Run { run_id, path } => store.artifact_path(&run_id, &path),
            _ => Err(TrackingError::InvalidModelUri { uri: version.source }.into()),
        }
    }
}
