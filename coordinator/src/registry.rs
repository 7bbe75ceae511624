use chrono::{DateTime, Utc};
use common::{JobId, JobInfo, JobPhase};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use tracing::debug;

use crate::config::Config;
use crate::error::{CoordinatorError, Result};
use crate::merge::artifact_file;

const JOB_ID_LEN: usize = 10;

/// Token bearer del cliente. Nunca aparece en logs ni en respuestas.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Lo que manda el cliente al crear un job.
#[derive(Debug, Clone)]
pub struct JobDraft {
    pub image_ref: String,
    pub input_path: String,
    pub output_path: String,
    pub total_workers: u32,
    pub access_token: AccessToken,
}

#[derive(Debug)]
pub(crate) struct Progress {
    pub assigned_workers: u32,
    pub completed_workers: u32,
    pub phase: JobPhase,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Un job en vuelo. Los campos públicos no cambian después del alta.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub input_path: String,
    pub output_path: String,
    pub total_workers: u32,
    pub callback_url: String,
    pub image_ref: String,
    pub access_token: AccessToken,
    pub submitted_at: DateTime<Utc>,

    progress: Mutex<Progress>,
    /// Serializa los appends al artefacto de este job.
    pub(crate) artifact_lock: tokio::sync::Mutex<()>,
}

impl Job {
    fn new(id: JobId, draft: JobDraft, config: &Config) -> Self {
        Self {
            name: config.workload_name(&id),
            callback_url: config.callback_url(),
            id,
            input_path: draft.input_path,
            output_path: draft.output_path,
            total_workers: draft.total_workers,
            image_ref: draft.image_ref,
            access_token: draft.access_token,
            submitted_at: Utc::now(),
            progress: Mutex::new(Progress {
                assigned_workers: 0,
                completed_workers: 0,
                phase: JobPhase::Watching,
                finished_at: None,
            }),
            artifact_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn progress(&self) -> Result<MutexGuard<'_, Progress>> {
        self.progress
            .lock()
            .map_err(|_| CoordinatorError::Internal(format!("lock progress del job {}", self.id)))
    }

    pub fn phase(&self) -> Result<JobPhase> {
        Ok(self.progress()?.phase)
    }

    pub fn info(&self) -> Result<JobInfo> {
        let p = self.progress()?;
        Ok(JobInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            phase: p.phase,
            input_folder_path: self.input_path.clone(),
            output_folder_path: self.output_path.clone(),
            total_workers: self.total_workers,
            assigned_workers: p.assigned_workers,
            completed_workers: p.completed_workers,
            submitted_at: self.submitted_at,
            finished_at: p.finished_at,
        })
    }

    /// Un worker marcó su último chunk como final.
    pub fn mark_worker_completed(&self) -> Result<u32> {
        let mut p = self.progress()?;
        p.completed_workers += 1;
        Ok(p.completed_workers)
    }

    /// WATCHING -> UPLOADING. Sólo el primero que llega obtiene `true`.
    pub fn claim_upload(&self) -> Result<bool> {
        let mut p = self.progress()?;
        if p.phase != JobPhase::Watching {
            return Ok(false);
        }
        p.phase = JobPhase::Uploading;
        Ok(true)
    }

    /// Pasa el job a una fase terminal. Una fase terminal no se sobreescribe.
    pub fn finish(&self, phase: JobPhase) -> Result<()> {
        let mut p = self.progress()?;
        if p.phase.is_terminal() {
            return Ok(());
        }
        p.phase = phase;
        p.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Registro de jobs en memoria, indexado por id.
///
/// El mapa sólo se bloquea para alta, baja y lookup; las mutaciones de cada job
/// van bajo el lock propio del job, así que jobs distintos no se bloquean entre sí.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Da de alta un job con un id nuevo: único entre los jobs vivos y sin
    /// artefacto previo en disco de un job ya terminado.
    pub fn register(&self, draft: JobDraft, config: &Config) -> Result<Arc<Job>> {
        self.register_with(draft, config, generate_job_id)
    }

    fn register_with(
        &self,
        draft: JobDraft,
        config: &Config,
        mut next_id: impl FnMut() -> JobId,
    ) -> Result<Arc<Job>> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| CoordinatorError::Internal("lock jobs".to_string()))?;

        loop {
            let id = next_id();
            if artifact_file(&config.artifact_dir, &id).exists() {
                debug!("id {} ya tiene artefacto en disco, se descarta", id);
                continue;
            }
            if let Entry::Vacant(slot) = jobs.entry(id.clone()) {
                let job = Arc::new(Job::new(id, draft, config));
                slot.insert(job.clone());
                return Ok(job);
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Arc<Job>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| CoordinatorError::Internal("lock jobs".to_string()))?;

        jobs.get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::JobNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Result<Option<Arc<Job>>> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| CoordinatorError::Internal("lock jobs".to_string()))?;
        Ok(jobs.remove(id))
    }

    pub fn len(&self) -> Result<usize> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| CoordinatorError::Internal("lock jobs".to_string()))?;
        Ok(jobs.len())
    }

}

fn generate_job_id() -> JobId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(JOB_ID_LEN);
    id
}
