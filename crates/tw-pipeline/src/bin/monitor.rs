//! Daily drift monitoring over one month of trips.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;

use tw_pipeline::{run_monitor, MonitorRequest, PipelineConfig};

#[derive(Parser)]
#[command(name = "tw-monitor")]
#[command(about = "Compute daily drift metrics against a reference dataset")]
#[command(version)]
struct Args {
    #[arg(long, default_value = "data/reference.parquet")]
    reference: PathBuf,

    #[arg(long, default_value = "data/green_tripdata_2024-03.parquet")]
    current: PathBuf,

    /// Scoring bundle; fitted on the reference data when missing
    #[arg(long, default_value = "models/lin_reg.json")]
    model: PathBuf,

    /// First monitored day (YYYY-MM-DD)
    #[arg(long)]
    begin: Option<NaiveDate>,

    /// Number of days to monitor
    #[arg(long)]
    days: Option<u32>,

    /// Seconds between days
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Append to the existing metrics table instead of recreating it
    #[arg(long)]
    keep_history: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tw_pipeline::init_tracing()?;

    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let request = MonitorRequest {
        reference_path: args.reference,
        current_path: args.current,
        model_path: args.model,
        begin: args.begin.and_then(|d| d.and_hms_opt(0, 0, 0)),
        days: args.days,
        interval: args.interval_secs.map(Duration::from_secs),
        keep_history: args.keep_history,
    };
    let outcome = run_monitor(&config, &request, tw_pipeline::ctrl_c_shutdown())
        .await
        .context("running the drift monitor")?;
    if outcome.summary.cancelled {
        tracing::warn!("Monitoring interrupted after {} days", outcome.summary.days_processed);
    }
    Ok(())
}
