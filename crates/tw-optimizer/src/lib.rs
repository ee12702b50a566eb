//! # tw-optimizer
//!
//! Hyperparameter search for TripWise.
//!
//! Provides search space definitions, seeded random and tree-structured Parzen
//! estimator strategies, trial tracking, and a driver that evaluates a fixed
//! number of trials sequentially against a caller-supplied objective.

mod driver;
mod search;
mod tpe;
mod trial;

pub use driver::{SearchDriver, SearchOutcome};
pub use search::{
    Configuration, ParameterDef, ParameterKind, ParameterValue, RandomSearch, SearchSpace,
    SearchStrategy,
};
pub use tpe::{TpeConfig, TpeSearch};
pub use trial::{
    SearchConfig, SearchId, SearchState, SearchStatus, StrategyKind, Trial, TrialStatus, Trials,
};
