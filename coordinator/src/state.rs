// coordinator/src/state.rs

use std::sync::Arc;

use crate::config::Config;
use crate::merge::ChunkMerger;
use crate::orchestrator::Orchestrator;
use crate::registry::JobRegistry;
use crate::upload::ArtifactUploader;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
    pub merger: Arc<ChunkMerger>,
    // colaboradores externos, detrás de traits para poder falsearlos
    pub orchestrator: Arc<dyn Orchestrator>,
    pub uploader: Arc<dyn ArtifactUploader>,
}

impl AppState {
    pub fn new(
        config: Config,
        merger: ChunkMerger,
        orchestrator: Arc<dyn Orchestrator>,
        uploader: Arc<dyn ArtifactUploader>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(JobRegistry::new()),
            merger: Arc::new(merger),
            orchestrator,
            uploader,
        }
    }
}
