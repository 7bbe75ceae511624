use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::Job;

/// Junta los chunks de los workers en un único artefacto por job.
///
/// Cada chunk trae la misma línea de cabecera; sólo se conserva la del primero.
/// Los appends de un mismo job van bajo `Job::artifact_lock`, en orden de llegada.
#[derive(Debug, Clone)]
pub struct ChunkMerger {
    dir: PathBuf,
}

impl ChunkMerger {
    /// Crea el directorio de artefactos si no existe.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        artifact_file(&self.dir, job_id)
    }

    /// Agrega un chunk al artefacto del job. Devuelve los bytes escritos.
    pub async fn submit_chunk(&self, job: &Job, chunk: &[u8]) -> Result<usize> {
        // chunk vacío: no crear el archivo, o el siguiente perdería su cabecera
        if chunk.is_empty() {
            return Ok(0);
        }

        let _guard = job.artifact_lock.lock().await;
        let path = self.artifact_path(&job.id);

        // un archivo vacío (ej: tras deshacer un primer append fallido) cuenta como ausente
        let body = if has_content(&path).await? {
            strip_header(chunk)
        } else {
            chunk
        };

        if body.is_empty() {
            debug!("chunk del job {} sólo traía cabecera, se descarta", job.id);
            return Ok(0);
        }

        append(&path, body).await?;
        debug!("job {}: +{} bytes en {}", job.id, body.len(), path.display());
        Ok(body.len())
    }
}

/// `<dir>/<job_id>.csv`
pub fn artifact_file(dir: &Path, job_id: &str) -> PathBuf {
    dir.join(format!("{}.csv", job_id))
}

async fn has_content(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len() > 0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Todo lo que viene después del primer '\n'.
/// Sin salto de línea el chunk entero es cabecera.
pub fn strip_header(chunk: &[u8]) -> &[u8] {
    match chunk.iter().position(|b| *b == b'\n') {
        Some(pos) => &chunk[pos + 1..],
        None => &[],
    }
}

async fn append(path: &Path, body: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let len_before = file.metadata().await?.len();

    let written = async {
        file.write_all(body).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        // deshacer un append a medias para no dejar una línea cortada
        warn!("falló el append en {}: {}, truncando a {} bytes", path.display(), e, len_before);
        if let Err(trunc) = file.set_len(len_before).await {
            warn!("no se pudo truncar {}: {}", path.display(), trunc);
        }
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordinatorError;
    use crate::registry::JobRegistry;
    use crate::testing::{draft, temp_dir, test_config};
    use std::sync::Arc;

    #[test]
    fn strip_header_casos_borde() {
        assert_eq!(strip_header(b"h\na\n"), b"a\n");
        assert_eq!(strip_header(b"h\n"), b"");
        assert_eq!(strip_header(b"solo-cabecera"), b"");
        assert_eq!(strip_header(b"\nx"), b"x");
    }

    #[tokio::test]
    async fn la_cabecera_se_conserva_una_sola_vez() {
        let merger = ChunkMerger::open(temp_dir("merge_cabecera")).unwrap();
        let registry = JobRegistry::new();
        let job = registry.register(draft(2), &test_config()).unwrap();

        assert_eq!(merger.submit_chunk(&job, b"h\na\n").await.unwrap(), 4);
        assert_eq!(merger.submit_chunk(&job, b"h\nb\n").await.unwrap(), 2);

        let out = std::fs::read(merger.artifact_path(&job.id)).unwrap();
        assert_eq!(out, b"h\na\nb\n");
    }

    #[tokio::test]
    async fn chunk_sin_salto_de_linea() {
        let merger = ChunkMerger::open(temp_dir("merge_sin_salto")).unwrap();
        let registry = JobRegistry::new();
        let job = registry.register(draft(3), &test_config()).unwrap();

        // el primero se guarda tal cual
        merger.submit_chunk(&job, b"h\na\n").await.unwrap();
        // los siguientes sin '\n' son sólo cabecera: no agregan nada
        assert_eq!(merger.submit_chunk(&job, b"h").await.unwrap(), 0);
        merger.submit_chunk(&job, b"h\nc\n").await.unwrap();

        let out = std::fs::read(merger.artifact_path(&job.id)).unwrap();
        assert_eq!(out, b"h\na\nc\n");
    }

    #[tokio::test]
    async fn primer_chunk_sin_salto_se_guarda_entero() {
        let merger = ChunkMerger::open(temp_dir("merge_primero_sin_salto")).unwrap();
        let registry = JobRegistry::new();
        let job = registry.register(draft(1), &test_config()).unwrap();

        assert_eq!(merger.submit_chunk(&job, b"h").await.unwrap(), 1);
        let out = std::fs::read(merger.artifact_path(&job.id)).unwrap();
        assert_eq!(out, b"h");
    }

    #[tokio::test]
    async fn chunk_vacio_no_crea_el_artefacto() {
        let merger = ChunkMerger::open(temp_dir("merge_vacio")).unwrap();
        let registry = JobRegistry::new();
        let job = registry.register(draft(2), &test_config()).unwrap();

        assert_eq!(merger.submit_chunk(&job, b"").await.unwrap(), 0);
        assert!(!merger.artifact_path(&job.id).exists());

        merger.submit_chunk(&job, b"h\na\n").await.unwrap();
        let out = std::fs::read(merger.artifact_path(&job.id)).unwrap();
        assert_eq!(out, b"h\na\n");
    }

    #[tokio::test]
    async fn artefacto_vacio_cuenta_como_primer_chunk() {
        let merger = ChunkMerger::open(temp_dir("merge_rollback")).unwrap();
        let registry = JobRegistry::new();
        let job = registry.register(draft(2), &test_config()).unwrap();

        // lo que queda en disco si el primer append falla y se trunca a 0
        std::fs::write(merger.artifact_path(&job.id), b"").unwrap();

        assert_eq!(merger.submit_chunk(&job, b"h\na\n").await.unwrap(), 4);
        merger.submit_chunk(&job, b"h\nb\n").await.unwrap();

        let out = std::fs::read(merger.artifact_path(&job.id)).unwrap();
        assert_eq!(out, b"h\na\nb\n");
    }

    #[tokio::test]
    async fn append_fallido_devuelve_error() {
        // /dev/full acepta el open y falla cada write con ENOSPC
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        match append(full, b"h\na\n").await {
            Err(CoordinatorError::Io(e)) => assert!(e.raw_os_error().is_some()),
            other => panic!("esperaba error de I/O, llegó {:?}", other),
        }
    }

    #[tokio::test]
    async fn jobs_distintos_van_a_archivos_distintos() {
        let merger = ChunkMerger::open(temp_dir("merge_dos_jobs")).unwrap();
        let registry = JobRegistry::new();
        let cfg = test_config();
        let a = registry.register(draft(1), &cfg).unwrap();
        let b = registry.register(draft(1), &cfg).unwrap();

        merger.submit_chunk(&a, b"h\na\n").await.unwrap();
        merger.submit_chunk(&b, b"h\nb\n").await.unwrap();

        assert_eq!(std::fs::read(merger.artifact_path(&a.id)).unwrap(), b"h\na\n");
        assert_eq!(std::fs::read(merger.artifact_path(&b.id)).unwrap(), b"h\nb\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn chunks_concurrentes_no_se_intercalan() {
        const WORKERS: usize = 16;
        const ROWS: usize = 200;

        let merger = Arc::new(ChunkMerger::open(temp_dir("merge_concurrentes")).unwrap());
        let registry = JobRegistry::new();
        let job = registry.register(draft(WORKERS as u32), &test_config()).unwrap();

        let chunks: Vec<Vec<u8>> = (0..WORKERS)
            .map(|w| {
                let mut c = b"col_a,col_b\n".to_vec();
                for r in 0..ROWS {
                    c.extend_from_slice(format!("w{w},{r}\n").as_bytes());
                }
                c
            })
            .collect();

        let handles: Vec<_> = chunks
            .iter()
            .cloned()
            .map(|chunk| {
                let merger = merger.clone();
                let job = job.clone();
                tokio::spawn(async move { merger.submit_chunk(&job, &chunk).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let out = std::fs::read_to_string(merger.artifact_path(&job.id)).unwrap();
        let header_len = "col_a,col_b\n".len();
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(out.len(), total - header_len * (WORKERS - 1));

        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("col_a,col_b"));

        // las filas de cada worker quedan contiguas y en orden
        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), WORKERS * ROWS);
        for block in rows.chunks(ROWS) {
            let owner = block[0].split(',').next().unwrap();
            for (r, line) in block.iter().enumerate() {
                assert_eq!(*line, format!("{owner},{r}"));
            }
        }
    }
}
