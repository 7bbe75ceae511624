pub mod job;
pub mod status;
pub mod worker;

pub use job::{JobId, JobInfo, JobPhase, JobUpdate};
pub use status::{decode_line, encode_line, StreamLine, WorkloadCondition, WorkloadStatus};
pub use worker::{InitWorkerForm, WorkerSpecs};
