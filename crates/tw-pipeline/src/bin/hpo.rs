//! Hyperparameter search over the random forest.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use tw_pipeline::hpo::DEFAULT_NUM_TRIALS;
use tw_pipeline::{run_optimization, PipelineConfig};

#[derive(Parser)]
#[command(name = "tw-hpo")]
#[command(about = "Search random forest hyperparameters and track every trial")]
#[command(version)]
struct Args {
    /// Location where the processed NYC taxi trip data was saved
    #[arg(long, default_value = "./output")]
    data_path: PathBuf,

    /// The number of parameter evaluations for the optimizer to explore
    #[arg(long, default_value_t = DEFAULT_NUM_TRIALS)]
    num_trials: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tw_pipeline::init_tracing()?;

    if args.num_trials == 0 {
        anyhow::bail!("--num-trials must be at least 1");
    }
    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let summary = run_optimization(&config, &args.data_path, args.num_trials).context("running the search")?;
    tracing::info!(
        "{} trials under run {}; best Combination{} rmse={:.4}",
        summary.trials,
        summary.parent_run_id,
        summary.best_tid,
        summary.best_rmse
    );
    Ok(())
}
