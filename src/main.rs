use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mri_segment::{
    ModelService, Segmenter,
    config::ServerConfig,
    server::{AppState, SegmentServer},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();
    info!(?config, "starting");

    let model = Arc::new(ModelService::from_model_path(&config.model));
    if !config.lazy_load {
        // a failed load is retried by the next request
        if let Err(e) = model.engine() {
            error!(model = %config.model.display(), error = %e, "failed to load model at startup");
        }
    }

    let state = Arc::new(AppState {
        segmenter: Segmenter::new(model),
        max_upload_bytes: config.max_upload_bytes(),
    });
    let server = SegmentServer::bind(&config.host, config.port)?;
    info!(addr = server.addr(), "server ready");

    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || server.run(state, runtime)).await?;
    Ok(())
}
