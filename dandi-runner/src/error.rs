// Error taxonomy for the runner.
//
// Absence (unmatched identifier, identity mismatch in a nested snapshot,
// missing asset file) is deliberately NOT an error: those paths return
// `Option::None` or empty collections. The variants below are the hard
// failures.

use std::path::PathBuf;

use dandiscript::ScriptError;
use thiserror::Error;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Transport-level bus failure (bind, relay, subscription).
    #[error("bus error: {0}")]
    Bus(String),

    /// The response publisher exhausted its retry budget.
    #[error("failed to send response for job {job_id} after {attempts} attempts")]
    DeliveryExhausted { job_id: String, attempts: u32 },

    /// Admission denied; becomes the fixed `rejected` message on the wire.
    #[error("Maximum number of concurrent jobs reached")]
    CapacityExceeded,

    #[error("dandiset data file not found: {}", path.display())]
    SnapshotNotFound { path: PathBuf },

    #[error("failed to parse JSON from {}: {message}", path.display())]
    SnapshotParse { path: PathBuf, message: String },

    /// A nested snapshot file claims a different identity than the one it
    /// was looked up under. Only the asset-detail path treats this as an
    /// error; the file-listing path degrades to an empty result instead.
    #[error("identity mismatch: expected {expected}, got {actual}")]
    SnapshotMismatch { expected: String, actual: String },

    #[error("DANDI API request failed: {0}")]
    Api(String),

    /// Caller-contract violation in a find query; raised before any
    /// network call is made.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Caller side: no `accepted` arrived within the admission timeout.
    #[error("failed to submit script: the job runner is probably offline")]
    RunnerOffline,

    /// Caller side: the job reached a terminal `rejected`/`error` status.
    #[error("{0}")]
    JobFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Json(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for RunnerError {
    fn from(e: std::io::Error) -> Self {
        RunnerError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(e: serde_json::Error) -> Self {
        RunnerError::Json(e.to_string())
    }
}
