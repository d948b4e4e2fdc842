//! Upload engine error types.

use docdrop_protocol::{JobId, SessionId};
use docdrop_transfer::TrackerError;

/// Errors returned to callers of the upload engine.
///
/// Transfer failures are not represented here; they end up as job state
/// and `job-error` events.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no files to upload")]
    EmptyBatch,

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("job {0} has nothing to recover")]
    NotRecoverable(JobId),

    #[error("choice '{choice}' is not available for job {job_id}")]
    InvalidChoice { job_id: JobId, choice: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
