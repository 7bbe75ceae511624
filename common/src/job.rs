use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Fase de un job dentro del coordinador.
///
/// WATCHING -> UPLOADING -> COMPLETE, o FAILED desde cualquiera de las dos primeras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Watching,
    Uploading,
    Complete,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Complete | JobPhase::Failed)
    }
}

/// Vista pública de un job. Nunca lleva el token de acceso.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub phase: JobPhase,

    pub input_folder_path: String,
    pub output_folder_path: String,

    /// -------- Progreso de workers --------
    pub total_workers: u32,
    pub assigned_workers: u32,
    pub completed_workers: u32,

    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Última línea del stream de estado: fase terminal del job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: JobId,
    pub phase: JobPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
