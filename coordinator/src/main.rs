mod assigner;
mod config;
mod error;
mod handlers;
mod launcher;
mod merge;
mod monitor;
mod orchestrator;
mod registry;
mod state;
mod upload;

#[cfg(test)]
mod testing;

use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::merge::ChunkMerger;
use crate::orchestrator::{KubeOrchestrator, Orchestrator};
use crate::state::AppState;
use crate::upload::{ArtifactUploader, StorageClient};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coordinator=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(Config::parse()).await {
        error!("el coordinador no pudo arrancar: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> error::Result<()> {
    let merger = ChunkMerger::open(&config.artifact_dir)?;

    let orchestrator: Arc<dyn Orchestrator> = match &config.orchestrator_url {
        Some(url) => Arc::new(KubeOrchestrator::with_base_url(
            url,
            &config.namespace,
            config.orchestrator_timeout(),
        )?),
        None => Arc::new(KubeOrchestrator::in_cluster(
            &config.namespace,
            config.orchestrator_timeout(),
        )?),
    };

    let uploader: Arc<dyn ArtifactUploader> = Arc::new(StorageClient::new(
        &config.storage_url,
        config.upload_timeout(),
        config.upload_retries,
        config.retry_backoff(),
    )?);

    info!(
        "artefactos en {}, workloads {}-{}-<id> en el namespace {}",
        config.artifact_dir.display(),
        config.workload_prefix,
        config.owner,
        config.namespace
    );

    let addr = config.listen_addr;
    let state = AppState::new(config, merger, orchestrator, uploader);

    // router HTTP
    let app = handlers::build_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("coordinador escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
