//! Tree-structured Parzen estimator search.
//!
//! After a run of uniform startup trials, the history is split into the best
//! `gamma` fraction ("below") and the rest ("above"). Each numeric parameter
//! gets two truncated-Gaussian mixtures, `l(x)` over the below values and
//! `g(x)` over the above values, each with a wide prior component centred on
//! the range. Candidates are drawn from `l` and the one maximising
//! `l(x) / g(x)` is proposed. Parameters are modelled independently.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use tracing::debug;

use crate::search::{Configuration, ParameterKind, ParameterValue, SearchSpace, SearchStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpeConfig {
    /// Uniform random trials before the estimator takes over.
    pub n_startup_trials: usize,
    /// Candidates drawn from `l(x)` per parameter per suggestion.
    pub n_ei_candidates: usize,
    /// Scales the size of the "below" split: ceil(gamma * sqrt(n)).
    pub gamma: f64,
    /// Weight of the prior component relative to one observation.
    pub prior_weight: f64,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            n_startup_trials: 10,
            n_ei_candidates: 24,
            gamma: 0.25,
            prior_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    config: TpeConfig,
    rng: ChaCha8Rng,
    history: Vec<(Configuration, f64)>,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            config: TpeConfig::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            history: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: TpeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observations(&self) -> usize {
        self.history.len()
    }

    /// Indices of the history split into (below, above) by ascending loss.
    /// The sort is stable so earlier trials win ties.
    fn split(&self) -> (Vec<usize>, Vec<usize>) {
        let n = self.history.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| self.history[a].1.total_cmp(&self.history[b].1));

        let n_below = ((self.config.gamma * (n as f64).sqrt()).ceil() as usize).clamp(1, n - 1);
        let above = order.split_off(n_below);
        (order, above)
    }

    fn values_of(&self, name: &str, indices: &[usize]) -> Vec<f64> {
        indices
            .iter()
            .filter_map(|&i| self.history[i].0.get(name))
            .map(ParameterValue::as_f64)
            .collect()
    }

    fn suggest_one(&mut self) -> Configuration {
        if self.history.len() < self.config.n_startup_trials.max(2) {
            return self.space.sample(&mut self.rng);
        }

        let (below, above) = self.split();
        let mut configuration = Configuration::new();

        for param in &self.space.parameters {
            let value = match &param.kind {
                ParameterKind::Fixed { value } => value.clone(),
                ParameterKind::FloatRange { low, high } => {
                    let l = Parzen::fit(&self.values_of(&param.name, &below), *low, *high, self.config.prior_weight);
                    let g = Parzen::fit(&self.values_of(&param.name, &above), *low, *high, self.config.prior_weight);
                    let x = best_candidate(&l, &g, self.config.n_ei_candidates, &mut self.rng, |p, x| p.log_pdf(x));
                    ParameterValue::Float(x)
                }
                ParameterKind::IntRange { low, high } => {
                    let (lo, hi) = (*low as f64, *high as f64);
                    let l = Parzen::fit(&self.values_of(&param.name, &below), lo, hi, self.config.prior_weight);
                    let g = Parzen::fit(&self.values_of(&param.name, &above), lo, hi, self.config.prior_weight);
                    let x = best_candidate(&l, &g, self.config.n_ei_candidates, &mut self.rng, |p, x| {
                        let k = x.round();
                        p.log_mass((k - 0.5).max(lo), (k + 0.5).min(hi))
                    });
                    ParameterValue::Int((x.round() as i64).clamp(*low, *high))
                }
            };
            configuration.insert(param.name.clone(), value);
        }

        debug!(
            "TPE proposal after {} observations ({} below): {:?}",
            self.history.len(),
            below.len(),
            configuration
        );
        configuration
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        (0..count).map(|_| self.suggest_one()).collect()
    }

    fn report(&mut self, params: &Configuration, loss: f64) {
        if loss.is_finite() {
            self.history.push((params.clone(), loss));
        }
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

fn best_candidate<F>(l: &Parzen, g: &Parzen, n_candidates: usize, rng: &mut ChaCha8Rng, log_score: F) -> f64
where
    F: Fn(&Parzen, f64) -> f64,
{
    let mut best_x = l.sample(rng);
    let mut best_score = log_score(l, best_x) - log_score(g, best_x);
    for _ in 1..n_candidates.max(1) {
        let x = l.sample(rng);
        let score = log_score(l, x) - log_score(g, x);
        if score > best_score {
            best_x = x;
            best_score = score;
        }
    }
    best_x
}

// ---------------------------------------------------------------------------
// Truncated Gaussian mixture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Parzen {
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    weights: Vec<f64>,
    low: f64,
    high: f64,
    unit: Normal,
}

impl Parzen {
    fn fit(observations: &[f64], low: f64, high: f64, prior_weight: f64) -> Self {
        let width = high - low;
        let prior_mu = 0.5 * (low + high);

        // (mu, is_prior), sorted so bandwidths come from neighbour gaps.
        let mut points: Vec<(f64, bool)> = observations.iter().map(|&x| (x, false)).collect();
        points.push((prior_mu, true));
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = points.len();
        let min_sigma = width / (100.0f64).min(1.0 + n as f64);

        let mut mus = Vec::with_capacity(n);
        let mut sigmas = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for (i, &(mu, is_prior)) in points.iter().enumerate() {
            let left = if i > 0 { mu - points[i - 1].0 } else { mu - low };
            let right = if i + 1 < n { points[i + 1].0 - mu } else { high - mu };
            let sigma = if is_prior {
                width
            } else {
                left.max(right).clamp(min_sigma, width)
            };
            mus.push(mu);
            sigmas.push(sigma);
            weights.push(if is_prior { prior_weight } else { 1.0 });
        }

        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }

        Self {
            mus,
            sigmas,
            weights,
            low,
            high,
            unit: Normal::standard(),
        }
    }

    fn cdf(&self, z: f64) -> f64 {
        self.unit.cdf(z)
    }

    fn normalizer(&self, i: usize) -> f64 {
        let (mu, s) = (self.mus[i], self.sigmas[i]);
        (self.cdf((self.high - mu) / s) - self.cdf((self.low - mu) / s)).max(f64::MIN_POSITIVE)
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.high <= self.low {
            return self.low;
        }
        let u: f64 = rng.random();
        let mut acc = 0.0;
        let mut k = self.weights.len() - 1;
        for (i, w) in self.weights.iter().enumerate() {
            acc += w;
            if u < acc {
                k = i;
                break;
            }
        }

        let (mu, s) = (self.mus[k], self.sigmas[k]);
        for _ in 0..64 {
            let u: f64 = 1.0 - rng.random::<f64>();
            let x = mu + s * self.unit.inverse_cdf(u);
            if x >= self.low && x <= self.high {
                return x;
            }
        }
        mu.clamp(self.low, self.high)
    }

    fn log_pdf(&self, x: f64) -> f64 {
        if self.high <= self.low {
            return 0.0;
        }
        let density: f64 = (0..self.mus.len())
            .map(|i| {
                let z = (x - self.mus[i]) / self.sigmas[i];
                let pdf = self.unit.pdf(z) / self.sigmas[i];
                self.weights[i] * pdf / self.normalizer(i)
            })
            .sum();
        density.max(f64::MIN_POSITIVE).ln()
    }

    fn log_mass(&self, lo: f64, hi: f64) -> f64 {
        if self.high <= self.low {
            return 0.0;
        }
        let mass: f64 = (0..self.mus.len())
            .map(|i| {
                let (mu, s) = (self.mus[i], self.sigmas[i]);
                let p = self.cdf((hi - mu) / s) - self.cdf((lo - mu) / s);
                self.weights[i] * p / self.normalizer(i)
            })
            .sum();
        mass.max(f64::MIN_POSITIVE).ln()
    }
}
