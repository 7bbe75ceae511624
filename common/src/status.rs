use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobUpdate;

/// Condición tipada que reporta el orquestador ("Complete", "Failed", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCondition {
    #[serde(rename = "type")]
    pub kind: String,
    /// "True", "False" o "Unknown"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Estado agregado de un workload paralelo, tal cual lo publica el orquestador.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkloadCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl WorkloadStatus {
    fn has_condition(&self, kind: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == kind && c.status.eq_ignore_ascii_case("true"))
    }

    /// Hay una condición "Complete" activa, en cualquier posición de la lista.
    pub fn is_complete(&self) -> bool {
        self.has_condition("Complete")
    }

    pub fn is_failed(&self) -> bool {
        self.has_condition("Failed")
    }
}

/// Una línea del stream de `/create`.
///
/// `Update` va primero: `WorkloadStatus` acepta cualquier objeto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamLine {
    Update(JobUpdate),
    Status(WorkloadStatus),
}

/// Serializa un valor como una línea JSON terminada en '\n'.
pub fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = serde_json::to_vec(value)?;
    out.push(b'\n');
    Ok(out)
}

pub fn decode_line(line: &[u8]) -> serde_json::Result<StreamLine> {
    serde_json::from_slice(line)
}
