//! Dobles de prueba de los colaboradores externos.

use async_trait::async_trait;
use clap::Parser;
use common::{WorkloadCondition, WorkloadStatus};
use std::{
    collections::VecDeque,
    env,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{CoordinatorError, Result};
use crate::merge::ChunkMerger;
use crate::orchestrator::{
    EventKind, Orchestrator, WorkloadEvent, WorkloadEvents, WorkloadHandle, WorkloadSpec,
};
use crate::registry::{AccessToken, JobDraft};
use crate::state::AppState;
use crate::upload::ArtifactUploader;

pub(crate) fn test_config() -> Config {
    Config::parse_from([
        "coordinator",
        "--owner",
        "test",
        "--workload-prefix",
        "fanout",
        "--callback-url",
        "http://coordinator-test/",
        "--watch-retries",
        "2",
        "--retry-backoff-ms",
        "5",
    ])
}

pub(crate) fn draft(workers: u32) -> JobDraft {
    JobDraft {
        image_ref: "registry.local/mapper:1".to_string(),
        input_path: "/data/in".to_string(),
        output_path: "/results/out".to_string(),
        total_workers: workers,
        access_token: AccessToken::new("secreto"),
    }
}

pub(crate) fn temp_dir(sub: &str) -> PathBuf {
    let base = env::temp_dir().join("coordinator_tests").join(sub);
    let _ = std::fs::remove_dir_all(&base);
    std::fs::create_dir_all(&base).unwrap();
    base
}

pub(crate) fn event(name: &str, kind: EventKind, conditions: &[(&str, &str)]) -> WorkloadEvent {
    WorkloadEvent {
        kind,
        name: name.to_string(),
        status: WorkloadStatus {
            conditions: conditions
                .iter()
                .map(|(kind, status)| WorkloadCondition {
                    kind: kind.to_string(),
                    status: status.to_string(),
                    reason: None,
                    message: None,
                    last_transition_time: None,
                })
                .collect(),
            ..Default::default()
        },
    }
}

/// Orquestador en memoria. Cada `watch_workloads` entrega la siguiente
/// suscripción preparada con `subscription()`; sin ninguna, falla.
#[derive(Default)]
pub(crate) struct FakeOrchestrator {
    pub created: Mutex<Vec<WorkloadSpec>>,
    pub watches: AtomicU32,
    pub fail_create: bool,
    pub(crate) subscriptions: Mutex<VecDeque<WorkloadEvents>>,
}

impl FakeOrchestrator {
    pub fn subscription(&self) -> mpsc::Sender<Result<WorkloadEvent>> {
        let (tx, rx) = mpsc::channel(16);
        self.subscriptions.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle> {
        if self.fail_create {
            return Err(CoordinatorError::UpstreamUnavailable(
                "orquestador caído".to_string(),
            ));
        }
        self.created.lock().unwrap().push(spec.clone());
        Ok(WorkloadHandle {
            name: spec.name.clone(),
            uid: None,
        })
    }

    async fn watch_workloads(&self) -> Result<WorkloadEvents> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoordinatorError::UpstreamUnavailable("watch rechazado".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadCall {
    pub local: PathBuf,
    pub destination: String,
    pub token: String,
}

#[derive(Default)]
pub(crate) struct FakeUploader {
    pub calls: Mutex<Vec<UploadCall>>,
    pub fail: bool,
}

#[async_trait]
impl ArtifactUploader for FakeUploader {
    async fn upload(&self, local: &Path, destination: &str, token: &AccessToken) -> Result<()> {
        self.calls.lock().unwrap().push(UploadCall {
            local: local.to_path_buf(),
            destination: destination.to_string(),
            token: token.expose().to_string(),
        });
        if self.fail {
            return Err(CoordinatorError::UpstreamUnavailable(
                "el almacenamiento respondió 503".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn test_state(
    sub: &str,
    orchestrator: FakeOrchestrator,
    uploader: FakeUploader,
) -> (AppState, Arc<FakeOrchestrator>, Arc<FakeUploader>) {
    let mut config = test_config();
    config.artifact_dir = temp_dir(sub);

    let orchestrator = Arc::new(orchestrator);
    let uploader = Arc::new(uploader);
    let merger = ChunkMerger::open(&config.artifact_dir).unwrap();

    let state = AppState::new(config, merger, orchestrator.clone(), uploader.clone());
    (state, orchestrator, uploader)
}
