use serde::{Deserialize, Serialize};

/// Respuesta de `/init`: la partición que le toca a un worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpecs {
    #[serde(rename = "workerId")]
    pub worker_id: u32,
    #[serde(rename = "nWorkers")]
    pub total_workers: u32,
    #[serde(rename = "inputFolderPath")]
    pub input_folder_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitWorkerForm {
    pub uid: String,
}
