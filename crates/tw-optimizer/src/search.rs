//! Search space definitions and parameter sampling strategies.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tw_types::{SearchError, TwResult};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as passed to the model (e.g. "max_depth").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive, drawn as a uniform value rounded
    /// to the nearest integer.
    IntRange { low: i64, high: i64 },
    /// Constant carried into every configuration (e.g. a model seed).
    Fixed { value: ParameterValue },
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Int(v) => *v,
            Self::Float(v) => v.round() as i64,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

/// One point of the search space, keyed by parameter name.
pub type Configuration = BTreeMap<String, ParameterValue>;

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_fixed(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Fixed { value },
        });
        self
    }

    /// Reject empty spaces and inverted or non-finite ranges.
    pub fn validate(&self) -> TwResult<()> {
        if self.parameters.is_empty() {
            return Err(SearchError::EmptySpace.into());
        }
        for param in &self.parameters {
            let (low, high) = match &param.kind {
                ParameterKind::FloatRange { low, high } => (*low, *high),
                ParameterKind::IntRange { low, high } => (*low as f64, *high as f64),
                ParameterKind::Fixed { .. } => continue,
            };
            if !low.is_finite() || !high.is_finite() || low > high {
                return Err(SearchError::InvalidRange {
                    parameter: param.name.clone(),
                    low,
                    high,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Draw one configuration uniformly from the space.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Configuration {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), sample_uniform(&param.kind, rng)))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn sample_uniform<R: Rng>(kind: &ParameterKind, rng: &mut R) -> ParameterValue {
    match kind {
        ParameterKind::FloatRange { low, high } => ParameterValue::Float(rng.random_range(*low..=*high)),
        ParameterKind::IntRange { low, high } => {
            let draw: f64 = rng.random_range(*low as f64..=*high as f64);
            ParameterValue::Int((draw.round() as i64).clamp(*low, *high))
        }
        ParameterKind::Fixed { value } => value.clone(),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Configuration>;

    /// Report a completed trial so adaptive strategies can learn. Lower loss
    /// is better.
    fn report(&mut self, _params: &Configuration, _loss: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Random search ----

/// Independent seeded sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        (0..count).map(|_| self.space.sample(&mut self.rng)).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}
