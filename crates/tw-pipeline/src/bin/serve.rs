use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use tw_pipeline::serve::{DEFAULT_ADDR, ENV_SERVE_ADDR};
use tw_pipeline::{serve, ModelCache, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tw_pipeline::init_tracing()?;

    let addr = std::env::var(ENV_SERVE_ADDR).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let cache = Arc::new(ModelCache::from_registry(config));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    serve(listener, cache, tw_pipeline::ctrl_c_shutdown()).await?;
    Ok(())
}
