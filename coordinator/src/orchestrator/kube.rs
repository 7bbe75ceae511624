use async_trait::async_trait;
use common::WorkloadStatus;
use reqwest::{Certificate, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{env, fs, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::{EventKind, Orchestrator, WorkloadEvent, WorkloadEvents, WorkloadHandle, WorkloadSpec};
use crate::error::{CoordinatorError, Result};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const EVENT_BUFFER: usize = 64;

/// Orquestador sobre la API batch/v1 Jobs de Kubernetes.
pub struct KubeOrchestrator {
    http: Client,
    base_url: String,
    namespace: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl KubeOrchestrator {
    /// Configuración in-cluster: host del service y credenciales del service account.
    pub fn in_cluster(namespace: &str, request_timeout: Duration) -> Result<Self> {
        let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            CoordinatorError::Internal(
                "KUBERNETES_SERVICE_HOST no está definida (¿fuera del cluster? usar --orchestrator-url)"
                    .to_string(),
            )
        })?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let token = fs::read_to_string(format!("{}/token", SERVICE_ACCOUNT_DIR))?;
        let ca = fs::read(format!("{}/ca.crt", SERVICE_ACCOUNT_DIR))?;

        let http = Client::builder()
            .add_root_certificate(Certificate::from_pem(&ca)?)
            .build()?;

        let base_url = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        Ok(Self {
            http,
            base_url,
            namespace: namespace.to_string(),
            token: Some(token.trim().to_string()),
            request_timeout,
        })
    }

    /// API expuesta sin credenciales propias, ej: `kubectl proxy`.
    pub fn with_base_url(base_url: &str, namespace: &str, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token: None,
            request_timeout,
        })
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.base_url, self.namespace
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle> {
        let resp = self
            .authorized(self.http.post(self.jobs_url()))
            .timeout(self.request_timeout)
            .json(&job_manifest(spec))
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            // sólo el mensaje: el cuerpo puede repetir el manifest con el token
            let msg = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("sin detalle");
            return Err(CoordinatorError::UpstreamUnavailable(format!(
                "el orquestador rechazó el workload {} ({}): {}",
                spec.name, status, msg
            )));
        }

        let uid = body
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
            .map(str::to_string);

        info!("workload {} creado (uid={:?})", spec.name, uid);
        Ok(WorkloadHandle {
            name: spec.name.clone(),
            uid,
        })
    }

    async fn watch_workloads(&self) -> Result<WorkloadEvents> {
        let resp = self
            .authorized(self.http.get(self.jobs_url()))
            .query(&[("watch", "true")])
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump_events(resp, tx));
        Ok(rx)
    }
}

/// Corta el cuerpo del watch en líneas y las manda decodificadas por el canal.
async fn pump_events(resp: reqwest::Response, tx: mpsc::Sender<Result<WorkloadEvent>>) {
    let body = resp.bytes_stream();
    tokio::pin!(body);
    let mut buf: Vec<u8> = Vec::new();

    loop {
        // soltar el receptor cierra la conexión del watch
        let next = tokio::select! {
            next = body.next() => next,
            _ = tx.closed() => {
                debug!("nadie escucha el watch, cerrando");
                return;
            }
        };
        let Some(next) = next else { break };

        let bytes = match next {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        buf.extend_from_slice(&bytes);

        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            match parse_watch_line(&line) {
                Ok(Some(event)) => {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("nadie escucha el watch, cerrando");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    debug!("el orquestador cerró el watch");
}

#[derive(Deserialize)]
struct WatchEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Value,
}

/// Decodifica una línea del watch. `None` para líneas vacías, bookmarks y tipos desconocidos.
pub fn parse_watch_line(line: &[u8]) -> Result<Option<WorkloadEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let envelope: WatchEnvelope = serde_json::from_slice(line).map_err(|e| {
        CoordinatorError::UpstreamUnavailable(format!("evento de watch ilegible: {}", e))
    })?;

    let kind = match envelope.kind.as_str() {
        "ADDED" => EventKind::Added,
        "MODIFIED" => EventKind::Modified,
        "DELETED" => EventKind::Deleted,
        "BOOKMARK" => return Ok(None),
        "ERROR" => {
            let msg = envelope
                .object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("sin detalle");
            return Err(CoordinatorError::UpstreamUnavailable(format!(
                "error en el watch: {}",
                msg
            )));
        }
        other => {
            warn!("tipo de evento desconocido en el watch: {}", other);
            return Ok(None);
        }
    };

    let name = envelope
        .object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CoordinatorError::UpstreamUnavailable("evento de watch sin metadata.name".to_string())
        })?
        .to_string();

    let status = match envelope.object.get("status") {
        Some(raw) => serde_json::from_value::<WorkloadStatus>(raw.clone()).map_err(|e| {
            CoordinatorError::UpstreamUnavailable(format!("status ilegible en {}: {}", name, e))
        })?,
        None => WorkloadStatus::default(),
    };

    Ok(Some(WorkloadEvent { kind, name, status }))
}

/// Manifest batch/v1 Job para un `WorkloadSpec`.
pub fn job_manifest(spec: &WorkloadSpec) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": spec.name },
        "spec": {
            "parallelism": spec.parallelism,
            "completions": spec.completions,
            "backoffLimit": spec.backoff_limit,
            "template": {
                "spec": {
                    "containers": [{
                        "name": spec.name,
                        "image": spec.image,
                        "args": spec.args,
                        "env": env,
                    }],
                    "restartPolicy": spec.restart_policy.as_str(),
                }
            }
        }
    })
}
