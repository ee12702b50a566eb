//! Fit and log the baseline forest.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use tw_pipeline::{run_train, PipelineConfig};

#[derive(Parser)]
#[command(name = "tw-train")]
#[command(about = "Train the baseline random forest and log it to the tracking store")]
#[command(version)]
struct Args {
    /// Location where the processed NYC taxi trip data was saved
    #[arg(long, default_value = "./output")]
    data_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tw_pipeline::init_tracing()?;

    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let outcome = run_train(&config, &args.data_path).context("training the baseline model")?;
    tracing::info!("Run {} rmse={:.4}", outcome.run_id, outcome.rmse);
    Ok(())
}
