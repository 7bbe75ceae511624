use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, WorkloadHandle, WorkloadSpec};
use crate::registry::Job;

/// Traduce un job al pedido de N workers paralelos.
///
/// Los workers reciben `-u <callback> -i <job_id>` y el token por entorno.
pub fn workload_spec(job: &Job, config: &Config) -> WorkloadSpec {
    WorkloadSpec {
        name: job.name.clone(),
        image: job.image_ref.clone(),
        args: vec![
            "-u".to_string(),
            job.callback_url.clone(),
            "-i".to_string(),
            job.id.clone(),
        ],
        env: vec![(
            config.token_env_var.clone(),
            job.access_token.expose().to_string(),
        )],
        parallelism: job.total_workers,
        completions: job.total_workers,
        backoff_limit: config.backoff_limit,
        restart_policy: config.restart_policy,
    }
}

pub async fn launch(
    orchestrator: &dyn Orchestrator,
    job: &Job,
    config: &Config,
) -> Result<WorkloadHandle> {
    let spec = workload_spec(job, config);
    info!(
        "lanzando job {} como workload {} ({} workers, imagen {})",
        job.id, spec.name, spec.parallelism, spec.image
    );
    orchestrator.create_workload(&spec).await
}
