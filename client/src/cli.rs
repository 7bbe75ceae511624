use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{decode_line, JobInfo, JobPhase, JobUpdate, StreamLine, WorkloadStatus};
use reqwest::{Client, StatusCode};

/// - En el cluster: COORDINATOR_URL=http://coordinator-<owner>
/// - Local: default http://localhost:8000
#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para mandar jobs al coordinador y seguir su estado")]
struct Cli {
    #[arg(long, env = "COORDINATOR_URL", default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crea un job y muestra su estado hasta que termina
    Submit {
        /// Imagen de contenedor que corre cada worker
        #[arg(long)]
        image: String,

        /// Carpeta de entrada que se reparte entre los workers
        #[arg(long)]
        input: String,

        /// Carpeta destino del resultado mergeado
        #[arg(long)]
        output: String,

        #[arg(long, default_value_t = 1)]
        workers: u32,

        #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Consulta el estado de un job en curso
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Submit {
            image,
            input,
            output,
            workers,
            token,
        } => {
            let url = format!("{}/create", base_url);
            let workers = workers.to_string();
            let form = [
                ("imageUrl", image.as_str()),
                ("inputFolderPath", input.as_str()),
                ("outputFolderPath", output.as_str()),
                ("workers", workers.as_str()),
            ];

            let mut resp = client
                .post(&url)
                .bearer_auth(&token)
                .form(&form)
                .send()
                .await
                .with_context(|| format!("no se pudo conectar con {}", url))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!("el coordinador rechazó el job ({}): {}", status, body);
            }

            if let Some(id) = resp.headers().get("x-job-id").and_then(|v| v.to_str().ok()) {
                println!("Job creado: {}", id);
            }

            let mut lines = LineBuffer::default();
            let mut last: Option<JobUpdate> = None;
            while let Some(bytes) = resp.chunk().await? {
                for line in lines.push(&bytes) {
                    match decode_line(&line) {
                        Ok(StreamLine::Update(update)) => {
                            println!("{}", describe_update(&update));
                            last = Some(update);
                        }
                        Ok(StreamLine::Status(status)) => println!("{}", describe_status(&status)),
                        Err(e) => eprintln!("línea ilegible en el stream: {}", e),
                    }
                }
            }

            match last {
                Some(update) if update.phase == JobPhase::Complete => {}
                Some(_) => std::process::exit(1),
                None => bail!("el stream se cortó antes de que el job terminara"),
            }
        }

        Commands::Status { id } => {
            let url = format!("{}/jobs/{}", base_url, id);
            let resp = client.get(&url).send().await?;

            match resp.status() {
                s if s.is_success() => {
                    let job: JobInfo = resp.json().await?;
                    println!("Job:");
                    println!("  id: {}", job.id);
                    println!("  workload: {}", job.name);
                    println!("  fase: {:?}", job.phase);
                    println!(
                        "  workers: total={}, asignados={}, terminados={}",
                        job.total_workers, job.assigned_workers, job.completed_workers
                    );
                    println!("  entrada: {}", job.input_folder_path);
                    println!("  salida: {}", job.output_folder_path);
                    println!("  submitted_at: {}", job.submitted_at);
                    if let Some(ref done) = job.finished_at {
                        println!("  finalizado: {}", done);
                    }
                }
                StatusCode::NOT_FOUND => {
                    println!("No hay un job en curso con id {id} (puede que ya haya terminado)")
                }
                other => bail!("error consultando {} (status {})", url, other),
            }
        }
    }

    Ok(())
}

/// Junta los bytes que llegan del stream y devuelve las líneas completas.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if !line.is_empty() {
                out.push(line);
            }
        }
        out
    }
}

fn describe_status(status: &WorkloadStatus) -> String {
    let mut parts = vec![format!(
        "activos={} ok={} fallidos={}",
        status.active.unwrap_or(0),
        status.succeeded.unwrap_or(0),
        status.failed.unwrap_or(0)
    )];
    for c in &status.conditions {
        parts.push(format!("{}={}", c.kind, c.status));
    }
    format!("[workload] {}", parts.join(" "))
}

fn describe_update(update: &JobUpdate) -> String {
    match &update.message {
        Some(msg) => format!("[job {}] {:?}: {}", update.job_id, update.phase, msg),
        None => format!("[job {}] {:?}", update.job_id, update.phase),
    }
}
