use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::MultipartRejection, rejection::FormRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use common::{InitWorkerForm, JobInfo, WorkerSpecs};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::assigner::assign_partition;
use crate::error::{CoordinatorError, Result};
use crate::launcher;
use crate::monitor;
use crate::registry::{AccessToken, JobDraft};
use crate::state::AppState;

pub const JOB_ID_HEADER: &str = "x-job-id";
const STREAM_BUFFER: usize = 32;

pub fn build_router(state: AppState) -> Router {
    let chunk_limit = state.config.max_chunk_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/create", post(create_job))
        .route("/init", post(init_worker))
        .route(
            "/write-chunk",
            post(write_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route("/jobs/:id", get(get_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobForm {
    image_url: String,
    input_folder_path: String,
    output_folder_path: String,
    workers: String,
}

// Crea el job, lo lanza en el orquestador y deja abierta la respuesta con su estado
async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: std::result::Result<Form<CreateJobForm>, FormRejection>,
) -> Result<Response> {
    let Form(form) = form.map_err(|e| CoordinatorError::BadRequest(e.body_text()))?;
    let access_token = bearer_token(&headers)?;

    let total_workers: u32 = form.workers.trim().parse().map_err(|_| {
        CoordinatorError::BadRequest(format!("workers inválido: {:?}", form.workers))
    })?;
    if total_workers == 0 {
        return Err(CoordinatorError::BadRequest(
            "workers tiene que ser al menos 1".to_string(),
        ));
    }

    let job = state.registry.register(
        JobDraft {
            image_ref: form.image_url,
            input_path: form.input_folder_path,
            output_path: form.output_folder_path,
            total_workers,
            access_token,
        },
        &state.config,
    )?;
    info!(
        "job {} creado (imagen {}, {} workers), {} jobs en curso",
        job.id,
        job.image_ref,
        job.total_workers,
        state.registry.len()?
    );

    if let Err(e) = launcher::launch(state.orchestrator.as_ref(), &job, &state.config).await {
        warn!("no se pudo lanzar el job {}: {}", job.id, e);
        state.registry.remove(&job.id)?;
        return Err(e);
    }

    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    tokio::spawn(monitor::watch_job(state.clone(), job.clone(), tx));

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let job_id = HeaderValue::from_str(&job.id)
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (header::HeaderName::from_static(JOB_ID_HEADER), job_id),
        ],
        body,
    )
        .into_response())
}

fn bearer_token(headers: &HeaderMap) -> Result<AccessToken> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoordinatorError::BadRequest("falta el header Authorization".to_string()))?;

    let mut parts = raw.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Ok(AccessToken::new(token))
        }
        _ => Err(CoordinatorError::BadRequest(
            "Authorization tiene que ser 'Bearer <token>'".to_string(),
        )),
    }
}

// Un worker pide su partición
async fn init_worker(
    State(state): State<AppState>,
    form: std::result::Result<Form<InitWorkerForm>, FormRejection>,
) -> Result<Json<WorkerSpecs>> {
    let Form(form) = form.map_err(|e| CoordinatorError::BadRequest(e.body_text()))?;
    let specs = assign_partition(&state.registry, &form.uid)?;
    Ok(Json(specs))
}

// Un worker manda un chunk de resultado
async fn write_chunk(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<StatusCode> {
    let mut multipart = multipart.map_err(|e| CoordinatorError::BadRequest(e.body_text()))?;

    let mut uid: Option<String> = None;
    let mut chunk: Option<Bytes> = None;
    let mut is_final = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoordinatorError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("chunk") => {
                chunk = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| CoordinatorError::BadRequest(e.body_text()))?,
                )
            }
            Some("uid") => {
                uid = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| CoordinatorError::BadRequest(e.body_text()))?,
                )
            }
            Some("final") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| CoordinatorError::BadRequest(e.body_text()))?;
                is_final = matches!(raw.trim(), "true" | "1");
            }
            other => debug!("campo ignorado en /write-chunk: {:?}", other),
        }
    }

    let uid = uid.ok_or_else(|| CoordinatorError::BadRequest("falta el campo uid".to_string()))?;
    let chunk =
        chunk.ok_or_else(|| CoordinatorError::BadRequest("falta el archivo chunk".to_string()))?;

    let job = state.registry.get(&uid)?;
    let written = state.merger.submit_chunk(&job, &chunk).await?;

    if is_final {
        let done = job.mark_worker_completed()?;
        info!(
            "job {}: worker terminó ({}/{}), último chunk de {} bytes",
            job.id, done, job.total_workers, written
        );
    }

    Ok(StatusCode::OK)
}

// Devuelve info básica de un job
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobInfo>> {
    let job = state.registry.get(&id)?;
    Ok(Json(job.info()?))
}
