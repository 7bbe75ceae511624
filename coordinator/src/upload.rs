use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use std::{path::Path, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{CoordinatorError, Result};
use crate::registry::AccessToken;

pub const UPLOAD_PATH: &str = "/multi-part-form-upload/";

#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Sube el artefacto local a `destination` en el almacenamiento remoto.
    async fn upload(&self, local: &Path, destination: &str, token: &AccessToken) -> Result<()>;
}

/// Cliente del servicio de almacenamiento (multipart `file` + `path`).
pub struct StorageClient {
    http: Client,
    endpoint: String,
    retries: u32,
    backoff: Duration,
}

impl StorageClient {
    pub fn new(base_url: &str, timeout: Duration, retries: u32, backoff: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), UPLOAD_PATH),
            retries,
            backoff,
        })
    }

    async fn try_upload(
        &self,
        contents: &[u8],
        file_name: &str,
        destination: &str,
        token: &AccessToken,
    ) -> std::result::Result<(), Attempt> {
        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(contents.to_vec()).file_name(file_name.to_string()),
            )
            .text("path", destination.to_string());

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token.expose())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let msg = format!("el almacenamiento respondió {}", status);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Attempt::Transient(msg))
        } else {
            Err(Attempt::Permanent(msg))
        }
    }
}

enum Attempt {
    Transient(String),
    Permanent(String),
}

#[async_trait]
impl ArtifactUploader for StorageClient {
    async fn upload(&self, local: &Path, destination: &str, token: &AccessToken) -> Result<()> {
        let contents = tokio::fs::read(local).await?;
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                CoordinatorError::Internal(format!("ruta de artefacto sin nombre: {}", local.display()))
            })?;

        let mut attempt: u32 = 0;
        loop {
            match self.try_upload(&contents, &file_name, destination, token).await {
                Ok(()) => {
                    info!(
                        "artefacto {} ({} bytes) subido a {}",
                        file_name,
                        contents.len(),
                        destination
                    );
                    return Ok(());
                }
                Err(Attempt::Permanent(msg)) => {
                    return Err(CoordinatorError::UpstreamUnavailable(msg));
                }
                Err(Attempt::Transient(msg)) => {
                    if attempt >= self.retries {
                        return Err(CoordinatorError::UpstreamUnavailable(format!(
                            "{} (tras {} intentos)",
                            msg,
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    warn!(
                        "subida de {} falló ({}), reintento {}/{}",
                        file_name, msg, attempt, self.retries
                    );
                    sleep(self.backoff * attempt).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Multipart, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use std::{
        env,
        path::PathBuf,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc, Mutex,
        },
    };
    use tokio::net::TcpListener;

    #[derive(Debug, Clone, Default)]
    struct Received {
        auth: Option<String>,
        file_name: Option<String>,
        file: Vec<u8>,
        path: Option<String>,
    }

    #[derive(Clone)]
    struct FakeStorage {
        calls: Arc<AtomicU32>,
        /// Cuántas llamadas iniciales responden con `fail_status`.
        fail_first: u32,
        fail_status: StatusCode,
        last: Arc<Mutex<Option<Received>>>,
    }

    async fn handle(
        State(s): State<FakeStorage>,
        headers: HeaderMap,
        mut form: Multipart,
    ) -> StatusCode {
        let n = s.calls.fetch_add(1, Ordering::SeqCst);
        let mut rec = Received {
            auth: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            ..Default::default()
        };
        while let Some(field) = form.next_field().await.unwrap() {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    rec.file_name = field.file_name().map(str::to_string);
                    rec.file = field.bytes().await.unwrap().to_vec();
                }
                Some("path") => rec.path = Some(field.text().await.unwrap()),
                _ => {}
            }
        }
        *s.last.lock().unwrap() = Some(rec);

        if n < s.fail_first {
            s.fail_status
        } else {
            StatusCode::OK
        }
    }

    async fn spawn_storage(fail_first: u32, fail_status: StatusCode) -> (String, FakeStorage) {
        let storage = FakeStorage {
            calls: Arc::new(AtomicU32::new(0)),
            fail_first,
            fail_status,
            last: Arc::new(Mutex::new(None)),
        };
        let app = Router::new()
            .route(UPLOAD_PATH, post(handle))
            .with_state(storage.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), storage)
    }

    fn artifact(sub: &str, contents: &[u8]) -> PathBuf {
        let dir = env::temp_dir().join("upload_tests").join(sub);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("abc123.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn client(base: &str, retries: u32) -> StorageClient {
        StorageClient::new(base, Duration::from_secs(5), retries, Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn sube_archivo_con_path_y_token() {
        let (base, storage) = spawn_storage(0, StatusCode::OK).await;
        let path = artifact("ok", b"h\na\nb\n");

        client(&base, 0)
            .upload(&path, "/users/ana/out", &AccessToken::new("tok-1"))
            .await
            .unwrap();

        let rec = storage.last.lock().unwrap().clone().unwrap();
        assert_eq!(rec.auth.as_deref(), Some("Bearer tok-1"));
        assert_eq!(rec.file_name.as_deref(), Some("abc123.csv"));
        assert_eq!(rec.file, b"h\na\nb\n");
        assert_eq!(rec.path.as_deref(), Some("/users/ana/out"));
        assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reintenta_errores_5xx() {
        let (base, storage) = spawn_storage(2, StatusCode::SERVICE_UNAVAILABLE).await;
        let path = artifact("reintento", b"h\n");

        client(&base, 3)
            .upload(&path, "/out", &AccessToken::new("t"))
            .await
            .unwrap();
        assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn corta_cuando_se_agotan_los_reintentos() {
        let (base, storage) = spawn_storage(10, StatusCode::BAD_GATEWAY).await;
        let path = artifact("agotado", b"h\n");

        let err = client(&base, 2)
            .upload(&path, "/out", &AccessToken::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UpstreamUnavailable(_)));
        assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn un_4xx_no_se_reintenta() {
        let (base, storage) = spawn_storage(10, StatusCode::FORBIDDEN).await;
        let path = artifact("prohibido", b"h\n");

        let err = client(&base, 3)
            .upload(&path, "/out", &AccessToken::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UpstreamUnavailable(_)));
        assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn artefacto_inexistente_es_error_de_io() {
        let (base, storage) = spawn_storage(0, StatusCode::OK).await;
        let missing = env::temp_dir().join("upload_tests").join("no-existe.csv");

        let err = client(&base, 3)
            .upload(&missing, "/out", &AccessToken::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Io(_)));
        assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn servicio_caido_es_upstream() {
        // puerto cerrado: bind y soltar
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let path = artifact("caido", b"h\n");

        let err = client(&format!("http://{}", addr), 1)
            .upload(&path, "/out", &AccessToken::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UpstreamUnavailable(_)));
    }
}
