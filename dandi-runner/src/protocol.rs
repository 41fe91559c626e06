// Wire shapes shared by the dispatcher and the caller-side client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Bus-delivery-format tag carried on job envelopes. The dispatcher
/// validates only the two required fields and ignores the tag itself.
pub const JOB_MESSAGE_TYPE: &str = "job";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
    pub script: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Rejected,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl JobResponse {
    pub fn accepted(job_id: &str) -> Self {
        JobResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Accepted,
            error: None,
            output: None,
        }
    }

    pub fn rejected(job_id: &str, error: String) -> Self {
        JobResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Rejected,
            error: Some(error),
            output: None,
        }
    }

    pub fn completed(job_id: &str, output: String) -> Self {
        JobResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Completed,
            error: None,
            output: Some(output),
        }
    }

    pub fn error(job_id: &str, error: String) -> Self {
        JobResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Error,
            error: Some(error),
            output: None,
        }
    }
}

/// Shape-validate an inbound job payload. Returns `None` for anything
/// that is not an object carrying string `jobId` and `script` fields;
/// such payloads are dropped by the dispatcher, never surfaced.
pub fn parse_job(payload: &Value) -> Option<JobRequest> {
    let object = match payload.as_object() {
        Some(object) => object,
        None => {
            debug!("invalid job message: not an object");
            return None;
        }
    };
    let job_id = object.get("jobId").and_then(Value::as_str);
    let script = object.get("script").and_then(Value::as_str);
    match (job_id, script) {
        (Some(job_id), Some(script)) => Some(JobRequest {
            job_id: job_id.to_string(),
            script: script.to_string(),
        }),
        _ => {
            debug!("invalid job message: missing jobId or script");
            None
        }
    }
}
