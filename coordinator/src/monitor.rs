use axum::body::Bytes;
use common::{encode_line, JobPhase, JobUpdate};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::mpsc, time::sleep};
use tracing::{info, warn};

use crate::orchestrator::EventKind;
use crate::registry::Job;
use crate::state::AppState;

/// Extremo del stream HTTP del cliente que creó el job.
pub type ClientSink = mpsc::Sender<Bytes>;

/// Cómo terminó la vigilancia de un job.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    Failed(String),
}

/// Reenvía líneas al cliente mientras siga conectado.
struct Relay {
    tx: ClientSink,
    open: bool,
    job_id: String,
}

impl Relay {
    async fn send<T: Serialize>(&mut self, value: &T) {
        if !self.open {
            return;
        }
        let line = match encode_line(value) {
            Ok(line) => line,
            Err(e) => {
                warn!("no se pudo serializar evento del job {}: {}", self.job_id, e);
                return;
            }
        };
        if self.tx.send(Bytes::from(line)).await.is_err() {
            info!(
                "el cliente del job {} se desconectó, se sigue vigilando para subir el resultado",
                self.job_id
            );
            self.open = false;
        }
    }
}

/// Vigila el job hasta su fase terminal.
///
/// Reenvía al cliente cada status del workload en el orden en que llega; al ver
/// la condición Complete sube el artefacto una sola vez. La última línea es
/// siempre un `JobUpdate` con la fase terminal. Al terminar el job sale del registro.
pub async fn watch_job(state: AppState, job: Arc<Job>, client: ClientSink) -> JobUpdate {
    let mut relay = Relay {
        tx: client,
        open: true,
        job_id: job.id.clone(),
    };

    let (phase, message) = match follow_until_terminal(&state, &job, &mut relay).await {
        Outcome::Uploaded => (JobPhase::Complete, None),
        Outcome::Failed(msg) => (JobPhase::Failed, Some(msg)),
    };

    if let Err(e) = job.finish(phase) {
        warn!("no se pudo cerrar el job {}: {}", job.id, e);
    }

    let update = JobUpdate {
        job_id: job.id.clone(),
        phase,
        message,
    };
    relay.send(&update).await;

    if let Err(e) = state.registry.remove(&job.id) {
        warn!("no se pudo sacar el job {} del registro: {}", job.id, e);
    }

    match &update.message {
        None => info!("job {} terminado: {:?}", job.id, update.phase),
        Some(msg) => warn!("job {} terminado: {:?} ({})", job.id, update.phase, msg),
    }
    update
}

async fn follow_until_terminal(state: &AppState, job: &Job, relay: &mut Relay) -> Outcome {
    let retries = state.config.watch_retries;
    let backoff = state.config.retry_backoff();
    let mut failures: u32 = 0;

    loop {
        let reason = match state.orchestrator.watch_workloads().await {
            Ok(mut events) => {
                let mut reason = "el orquestador cerró el watch".to_string();

                while let Some(item) = events.recv().await {
                    let event = match item {
                        Ok(event) => event,
                        Err(e) => {
                            reason = e.to_string();
                            break;
                        }
                    };
                    if event.name != job.name {
                        continue;
                    }
                    failures = 0;

                    relay.send(&event.status).await;

                    if event.status.is_complete() {
                        return upload_artifact(state, job).await;
                    }
                    if event.status.is_failed() {
                        return Outcome::Failed(format!(
                            "el orquestador marcó el workload {} como fallido",
                            job.name
                        ));
                    }
                    if event.kind == EventKind::Deleted {
                        return Outcome::Failed(format!(
                            "el workload {} se borró antes de completarse",
                            job.name
                        ));
                    }
                }
                reason
            }
            Err(e) => e.to_string(),
        };

        failures += 1;
        if failures > retries {
            return Outcome::Failed(format!("se perdió el watch del orquestador: {}", reason));
        }
        warn!(
            "watch del job {} interrumpido ({}), reconectando {}/{}",
            job.id, reason, failures, retries
        );
        sleep(backoff * failures).await;
    }
}

async fn upload_artifact(state: &AppState, job: &Job) -> Outcome {
    match job.claim_upload() {
        Ok(true) => {}
        Ok(false) => {
            return Outcome::Failed(format!("la subida del job {} ya fue reclamada", job.id))
        }
        Err(e) => return Outcome::Failed(e.to_string()),
    }

    let path = state.merger.artifact_path(&job.id);
    info!(
        "job {} completo, subiendo {} a {}",
        job.id,
        path.display(),
        job.output_path
    );

    match state
        .uploader
        .upload(&path, &job.output_path, &job.access_token)
        .await
    {
        Ok(()) => Outcome::Uploaded,
        Err(e) => Outcome::Failed(format!("falló la subida del artefacto: {}", e)),
    }
}
