//! Score one month of trips with a serialized bundle.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use tw_pipeline::{run_batch, BatchRequest, PipelineConfig};

#[derive(Parser)]
#[command(name = "tw-batch")]
#[command(about = "Predict trip durations for one month of rides")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value_t = 2023)]
    year: i32,

    #[arg(short, long, default_value_t = 3)]
    month: u32,

    /// Serialized vectorizer and model
    #[arg(long, default_value = "model.json")]
    model: PathBuf,

    /// Copy the output to the predictions bucket
    #[arg(long)]
    upload: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tw_pipeline::init_tracing()?;

    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let request = BatchRequest {
        year: args.year,
        month: args.month,
        model_path: args.model,
        upload: args.upload,
    };
    let outcome = run_batch(&config, &request)
        .await
        .with_context(|| format!("scoring {}-{:02}", args.year, args.month))?;
    tracing::info!(
        "Scored {} of {} rides into {}",
        outcome.rows_scored,
        outcome.rows_read,
        outcome.output.display()
    );
    Ok(())
}
