//! # tw-pipeline
//!
//! The TripWise stages wired together: feature preparation, the baseline
//! run, the hyperparameter search, promotion of the best model, monthly batch
//! scoring, daily drift monitoring and the online prediction service. Each
//! stage has its own binary under `src/bin`.

pub mod batch;
pub mod config;
pub mod hpo;
pub mod monitoring;
pub mod prepare;
pub mod promote;
pub mod recorder;
pub mod serve;
pub mod train;

pub use batch::{run_batch, score_frame, upload_predictions, BatchOutcome, BatchRequest};
pub use config::PipelineConfig;
pub use hpo::{run_optimization, HpoSummary};
pub use monitoring::{run_monitor, MonitorOutcome, MonitorRequest};
pub use prepare::{run_prepare, PrepareOutcome};
pub use promote::{run_register_model, PromotionOutcome};
pub use recorder::RunRecorder;
pub use serve::{serve, ModelCache};
pub use train::{run_train, TrainOutcome};

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();
    Ok(())
}

/// A shutdown flag that turns true on Ctrl-C.
pub fn ctrl_c_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            let _ = tx.send(true);
        }
    });
    rx
}
