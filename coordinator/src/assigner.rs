use common::WorkerSpecs;
use tracing::{info, warn};

use crate::error::{CoordinatorError, Result};
use crate::registry::JobRegistry;

/// Reparte la siguiente partición del job.
///
/// Leer e incrementar `assigned_workers` ocurre bajo el lock del job, así que dos
/// workers nunca reciben el mismo índice. Pasado `total_workers` devuelve
/// `CapacityExceeded`.
pub fn assign_partition(registry: &JobRegistry, job_id: &str) -> Result<WorkerSpecs> {
    let job = registry.get(job_id)?;

    let worker_id = {
        let mut progress = job.progress()?;
        if progress.assigned_workers >= job.total_workers {
            warn!(
                "job {} pidió partición pero ya repartió {}/{}",
                job.id, progress.assigned_workers, job.total_workers
            );
            return Err(CoordinatorError::CapacityExceeded {
                job_id: job.id.clone(),
                total: job.total_workers,
            });
        }
        let idx = progress.assigned_workers;
        progress.assigned_workers += 1;
        idx
    };

    info!(
        "asignando partición {}/{} del job {}",
        worker_id, job.total_workers, job.id
    );

    Ok(WorkerSpecs {
        worker_id,
        total_workers: job.total_workers,
        input_folder_path: job.input_path.clone(),
    })
}
