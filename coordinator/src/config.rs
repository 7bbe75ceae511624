use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::orchestrator::RestartPolicy;

/// Configuración del coordinador. Cada flag se puede pasar por variable de entorno.
#[derive(Debug, Clone, Parser)]
#[command(name = "coordinator")]
#[command(about = "Coordinador fan-out/fan-in de jobs paralelos")]
pub struct Config {
    /// Dirección donde escucha el servidor HTTP.
    #[arg(long, env = "COORDINATOR_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: SocketAddr,

    /// Directorio donde se guardan los artefactos mergeados (<job_id>.csv).
    #[arg(long, env = "ARTIFACT_DIR", default_value = "/storage/output")]
    pub artifact_dir: PathBuf,

    /// Identidad dueña de los workloads; forma parte del nombre del job.
    #[arg(long, env = "WORKLOAD_OWNER", default_value = "anonymous")]
    pub owner: String,

    #[arg(long, env = "WORKLOAD_PREFIX", default_value = "fanout")]
    pub workload_prefix: String,

    /// URL con la que los workers llaman a /init y /write-chunk.
    /// Si no se define: http://coordinator-<owner>/
    #[arg(long, env = "CALLBACK_URL")]
    pub callback_url: Option<String>,

    #[arg(long, env = "ORCHESTRATOR_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// URL base de la API del orquestador (ej: `kubectl proxy`).
    /// Si no se define se usa la configuración in-cluster.
    #[arg(long, env = "ORCHESTRATOR_URL")]
    pub orchestrator_url: Option<String>,

    /// Timeout de los pedidos al orquestador (no aplica al watch, que es largo).
    #[arg(long, env = "ORCHESTRATOR_TIMEOUT_SECS", default_value_t = 30)]
    pub orchestrator_timeout_secs: u64,

    /// Fallos de workers tolerados por el orquestador antes de dar el job por fallido.
    #[arg(long, env = "WORKER_BACKOFF_LIMIT", default_value_t = 5)]
    pub backoff_limit: u32,

    /// Qué hace el orquestador con un worker que falla.
    #[arg(long, env = "WORKER_RESTART_POLICY", value_enum, default_value_t = RestartPolicy::Never)]
    pub restart_policy: RestartPolicy,

    /// Variable de entorno con la que el worker recibe el token de acceso.
    #[arg(long, env = "WORKER_TOKEN_ENV", default_value = "WORKER_ACCESS_TOKEN")]
    pub token_env_var: String,

    /// URL base del servicio de almacenamiento.
    #[arg(long, env = "STORAGE_URL", default_value = "http://storage")]
    pub storage_url: String,

    #[arg(long, env = "UPLOAD_TIMEOUT_SECS", default_value_t = 10)]
    pub upload_timeout_secs: u64,

    /// Reintentos extra de la subida ante errores transitorios.
    #[arg(long, env = "UPLOAD_RETRIES", default_value_t = 3)]
    pub upload_retries: u32,

    /// Reconexiones del watch del orquestador antes de dar el job por perdido.
    #[arg(long, env = "WATCH_RETRIES", default_value_t = 5)]
    pub watch_retries: u32,

    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Tamaño máximo de un request a /write-chunk.
    #[arg(long, env = "MAX_CHUNK_BYTES", default_value_t = 1 << 30)]
    pub max_chunk_bytes: usize,
}

impl Config {
    pub fn callback_url(&self) -> String {
        self.callback_url
            .clone()
            .unwrap_or_else(|| format!("http://coordinator-{}/", self.owner))
    }

    /// Nombre del workload: <prefix>-<owner>-<job_id>
    pub fn workload_name(&self, job_id: &str) -> String {
        format!("{}-{}-{}", self.workload_prefix, self.owner, job_id)
    }

    pub fn orchestrator_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
