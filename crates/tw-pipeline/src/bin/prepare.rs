//! Turn three consecutive green-taxi months into train/val/test splits.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use tw_pipeline::prepare::{run_prepare, DEFAULT_START_MONTH, DEFAULT_START_YEAR};

#[derive(Parser)]
#[command(name = "tw-prepare")]
#[command(about = "Build feature splits and the vectorizer from raw trip months")]
#[command(version)]
struct Args {
    /// Directory holding green_tripdata_YYYY-MM.parquet files
    #[arg(long, default_value = "./data")]
    raw_data_path: PathBuf,

    /// Where to write train/val/test.json and dv.json
    #[arg(long, default_value = "./output")]
    dest_path: PathBuf,

    /// Year of the training month
    #[arg(long, default_value_t = DEFAULT_START_YEAR)]
    year: i32,

    /// Training month; the next two months become val and test
    #[arg(long, default_value_t = DEFAULT_START_MONTH)]
    month: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tw_pipeline::init_tracing()?;

    let outcome = run_prepare(&args.raw_data_path, &args.dest_path, args.year, args.month)
        .await
        .with_context(|| format!("preparing features from {}", args.raw_data_path.display()))?;
    for (split, rows) in outcome.rows {
        tracing::info!("{:?}: {} rows", split, rows);
    }
    Ok(())
}
