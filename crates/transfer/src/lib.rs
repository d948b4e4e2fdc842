//! Upload job state machine and progress aggregation.
//!
//! [`JobTracker`] owns every job record and is the only place job fields
//! change. [`summarize`] derives session-wide figures from a set of jobs
//! without touching them.

mod progress;
mod tracker;
mod types;
mod validation;

pub use progress::{ProgressSummary, summarize};
pub use tracker::JobTracker;
pub use types::UploadJob;
pub use validation::validate_file_name;

use docdrop_protocol::{JobId, JobStatus};

/// Errors produced by the job tracker.
///
/// These signal caller bugs (bad input, unknown ids, illegal transitions),
/// never transfer failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("job {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} is still active")]
    JobActive(JobId),
}
