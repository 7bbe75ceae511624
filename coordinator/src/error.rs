use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::JobId;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("request inválido: {0}")]
    BadRequest(String),

    #[error("job no encontrado: {0}")]
    JobNotFound(JobId),

    #[error("el job {job_id} ya repartió sus {total} particiones")]
    CapacityExceeded { job_id: JobId, total: u32 },

    #[error("servicio externo no disponible: {0}")]
    UpstreamUnavailable(String),

    #[error("error de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("error interno: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(e: reqwest::Error) -> Self {
        CoordinatorError::UpstreamUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoordinatorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::JobNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            CoordinatorError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            CoordinatorError::Io(_) | CoordinatorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
