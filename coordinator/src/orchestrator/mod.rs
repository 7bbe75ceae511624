//! Frontera con el orquestador de clusters que corre los workers.
//!
//! El coordinador sólo pide workloads y observa su estado; paralelismo y
//! reintentos de los workers son cosa del orquestador.

mod kube;

pub use kube::KubeOrchestrator;

use async_trait::async_trait;
use common::WorkloadStatus;
use tokio::sync::mpsc;

use crate::error::Result;

/// Política de reinicio dentro de una instancia de worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RestartPolicy {
    /// Un worker que falla no se reinicia en el lugar; cuenta contra el backoff.
    Never,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::Never => "Never",
            RestartPolicy::OnFailure => "OnFailure",
        }
    }
}

/// Pedido de un workload paralelo: N instancias de la misma imagen.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    /// Variables de entorno del worker. Puede llevar el token: no loguear.
    pub env: Vec<(String, String)>,
    pub parallelism: u32,
    pub completions: u32,
    pub backoff_limit: u32,
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadHandle {
    pub name: String,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// Cambio de estado de un workload cualquiera del namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadEvent {
    pub kind: EventKind,
    pub name: String,
    pub status: WorkloadStatus,
}

/// Eventos en el orden en que los emite el orquestador.
/// Un `Err` corta la suscripción; el canal cerrado también.
pub type WorkloadEvents = mpsc::Receiver<Result<WorkloadEvent>>;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle>;

    /// Abre una suscripción a los eventos de todos los workloads.
    async fn watch_workloads(&self) -> Result<WorkloadEvents>;
}
