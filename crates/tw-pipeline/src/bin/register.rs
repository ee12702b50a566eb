//! Retrain the best search trials and promote the winner.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use tw_pipeline::promote::DEFAULT_TOP_N;
use tw_pipeline::{run_register_model, PipelineConfig};

#[derive(Parser)]
#[command(name = "tw-register")]
#[command(about = "Evaluate the top search runs on the test split and promote the best one")]
#[command(version)]
struct Args {
    /// Location where the processed NYC taxi trip data was saved
    #[arg(long, default_value = "./output")]
    data_path: PathBuf,

    /// Number of top models that need to be evaluated to decide which one to promote
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    top_n: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tw_pipeline::init_tracing()?;

    if args.top_n == 0 {
        anyhow::bail!("--top-n must be at least 1");
    }
    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let outcome = run_register_model(&config, &args.data_path, args.top_n).context("promoting the best model")?;
    tracing::info!(
        "{} v{} ({}) from run {} with test_rmse={:.4}",
        outcome.version.name,
        outcome.version.version,
        config.champion_alias,
        outcome.champion_run_id,
        outcome.test_rmse
    );
    Ok(())
}
