//! # tw-tracking
//!
//! Local experiment tracking and model registry for TripWise. Experiments,
//! runs, artifacts and registered models are plain JSON files under one root
//! directory, so every pipeline stage can share them without a server.

pub mod registry;
pub mod store;

pub use registry::{ModelRegistry, ModelUri, ModelVersion, RegisteredModel};
pub use store::{
    Experiment, ExperimentHandle, ExperimentId, LifecycleStage, Metric, Nesting, Run, RunData, RunId,
    RunInfo, RunQuery, RunStatus, TrackingStore, PARENT_RUN_TAG,
};
