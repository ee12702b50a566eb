//! Runs a fixed number of sequential trials against an objective.

use tracing::{info, warn};

use tw_types::{SearchError, TwResult};

use crate::search::{Configuration, RandomSearch, SearchStrategy};
use crate::tpe::TpeSearch;
use crate::trial::{SearchConfig, SearchStatus, StrategyKind, Trial, Trials};

/// Everything a finished search produced.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    pub trials: Trials,
}

impl SearchOutcome {
    pub fn best(&self) -> Option<&Trial> {
        self.trials.best()
    }
}

pub struct SearchDriver {
    config: SearchConfig,
    strategy: Box<dyn SearchStrategy>,
}

impl SearchDriver {
    /// Build a driver with the strategy named in `config`.
    pub fn new(config: SearchConfig) -> TwResult<Self> {
        config.search_space.validate()?;
        let strategy: Box<dyn SearchStrategy> = match config.strategy {
            StrategyKind::Random => Box::new(RandomSearch::new(config.search_space.clone(), config.seed)),
            StrategyKind::Tpe => Box::new(TpeSearch::new(config.search_space.clone(), config.seed)),
        };
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Evaluate exactly `max_trials` configurations, one after another.
    ///
    /// Each loss must be finite and non-negative. An objective error or an
    /// invalid loss aborts the search.
    pub fn run<F>(&mut self, mut objective: F) -> TwResult<SearchOutcome>
    where
        F: FnMut(usize, &Configuration) -> TwResult<f64>,
    {
        if self.config.max_trials == 0 {
            return Err(SearchError::EmptyBudget.into());
        }

        let mut status = SearchStatus::new(self.config.clone());
        let mut trials = Trials::new();
        status.mark_running();

        info!(
            "Starting '{}' search: {} trials, strategy={}, seed={}",
            self.config.name,
            self.config.max_trials,
            self.strategy.name(),
            self.config.seed
        );

        for tid in 0..self.config.max_trials {
            let Some(configuration) = self.strategy.suggest(1).pop() else {
                let err = SearchError::NoSuggestion {
                    strategy: self.strategy.name().to_string(),
                };
                status.mark_failed(err.to_string());
                return Err(err.into());
            };

            let mut trial = Trial::new(status.id, tid, configuration);
            trial.mark_running();

            let loss = match objective(tid, &trial.configuration) {
                Ok(loss) => loss,
                Err(e) => {
                    warn!("Trial {} failed: {}", tid, e);
                    trial.mark_failed(e.to_string());
                    status.mark_failed(e.to_string());
                    return Err(e);
                }
            };
            if !loss.is_finite() || loss < 0.0 {
                let err = SearchError::InvalidLoss { trial_id: tid, loss };
                trial.mark_failed(err.to_string());
                status.mark_failed(err.to_string());
                return Err(err.into());
            }

            trial.mark_completed(loss);
            self.strategy.report(&trial.configuration, loss);
            status.trials_completed += 1;
            status.update_best(&trial);
            info!(
                "Trial {} finished with {}={:.4} in {:.2}s",
                tid,
                self.config.objective_metric,
                loss,
                trial.duration_seconds().unwrap_or_default()
            );
            trials.push(trial);
        }

        status.mark_completed();
        if let Some(best) = trials.best() {
            info!(
                "Search '{}' done; best trial {} with {}={:.4}",
                self.config.name,
                best.tid,
                self.config.objective_metric,
                best.loss.unwrap_or(f64::NAN)
            );
        }
        Ok(SearchOutcome { status, trials })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ParameterValue, SearchSpace};
    use crate::tpe::TpeConfig;
    use crate::trial::SearchState;

    fn config(strategy: StrategyKind, trials: usize) -> SearchConfig {
        let space = SearchSpace::new()
            .add_int("max_depth", 1, 20)
            .add_int("min_samples_leaf", 1, 4)
            .add_fixed("random_state", ParameterValue::Int(42));
        SearchConfig::new("driver-test", space, strategy)
            .with_max_trials(trials)
            .with_seed(42)
    }

    fn objective(_tid: usize, c: &Configuration) -> TwResult<f64> {
        Ok((c["max_depth"].as_f64() - 8.0).abs() + c["min_samples_leaf"].as_f64())
    }

    #[test]
    fn runs_exactly_the_budget() {
        for strategy in [StrategyKind::Random, StrategyKind::Tpe] {
            let mut driver = SearchDriver::new(config(strategy, 15)).unwrap();
            let mut calls = 0;
            let outcome = driver
                .run(|tid, c| {
                    calls += 1;
                    objective(tid, c)
                })
                .unwrap();
            assert_eq!(calls, 15);
            assert_eq!(outcome.trials.len(), 15);
            assert_eq!(outcome.status.trials_completed, 15);
            assert_eq!(outcome.status.state, SearchState::Completed);

            let tids: Vec<usize> = outcome.trials.iter().map(|t| t.tid).collect();
            assert_eq!(tids, (0..15).collect::<Vec<_>>());
        }
    }

    #[test]
    fn best_is_no_worse_than_any_trial() {
        let mut driver = SearchDriver::new(config(StrategyKind::Tpe, 25)).unwrap();
        let outcome = driver.run(objective).unwrap();
        let best = outcome.best().unwrap().loss.unwrap();
        assert!(outcome.trials.losses().iter().all(|&l| best <= l));
        assert_eq!(outcome.status.best_trial.as_ref().map(|t| t.tid), outcome.best().map(|t| t.tid));
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let a = SearchDriver::new(config(StrategyKind::Tpe, 25)).unwrap().run(objective).unwrap();
        let b = SearchDriver::new(config(StrategyKind::Tpe, 25)).unwrap().run(objective).unwrap();
        let ca: Vec<_> = a.trials.iter().map(|t| t.configuration.clone()).collect();
        let cb: Vec<_> = b.trials.iter().map(|t| t.configuration.clone()).collect();
        assert_eq!(ca, cb);
        assert_eq!(a.best().map(|t| t.tid), b.best().map(|t| t.tid));
    }

    fn depth_gap(trials: &[Trial]) -> f64 {
        trials
            .iter()
            .map(|t| (t.configuration["max_depth"].as_f64() - 8.0).abs())
            .sum::<f64>()
            / trials.len() as f64
    }

    #[test]
    fn estimator_proposals_beat_startup_sampling() {
        let startup = TpeConfig::default().n_startup_trials;
        assert!(startup < 15, "a default-sized search must reach the estimator");

        let mut driver = SearchDriver::new(config(StrategyKind::Tpe, 40)).unwrap();
        let outcome = driver
            .run(|_, c| {
                let d = c["max_depth"].as_f64() - 8.0;
                Ok(d * d + c["min_samples_leaf"].as_f64())
            })
            .unwrap();
        let trials: Vec<Trial> = outcome.trials.iter().cloned().collect();
        let early = depth_gap(&trials[..startup]);
        let late = depth_gap(&trials[20..]);
        assert!(late < early, "startup gap {early}, estimator gap {late}");
    }

    #[test]
    fn invalid_loss_aborts() {
        let mut driver = SearchDriver::new(config(StrategyKind::Random, 5)).unwrap();
        let err = driver
            .run(|tid, _| Ok(if tid == 2 { f64::NAN } else { 1.0 }))
            .unwrap_err();
        assert!(matches!(
            err,
            tw_types::TwError::Search(SearchError::InvalidLoss { trial_id: 2, .. })
        ));

        let mut driver = SearchDriver::new(config(StrategyKind::Random, 5)).unwrap();
        assert!(driver.run(|_, _| Ok(-0.5)).is_err());
    }

    #[test]
    fn objective_errors_propagate() {
        let mut driver = SearchDriver::new(config(StrategyKind::Random, 5)).unwrap();
        let mut calls = 0;
        let result = driver.run(|_, _| {
            calls += 1;
            Err(tw_types::TwError::Internal("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut driver = SearchDriver::new(config(StrategyKind::Random, 0)).unwrap();
        assert!(driver.run(objective).is_err());
    }
}
