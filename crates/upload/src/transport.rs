//! Transport trait and the progress hand-off given to each transfer.
//!
//! The application implements [`Transport`] on top of whatever actually
//! moves bytes (HTTP client, local filesystem, ...). Keeping it a trait keeps
//! session logic decoupled from the wire and testable with mocks.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use docdrop_protocol::{DestinationDirective, JobId, UploadEvent};
use docdrop_transfer::{JobTracker, UploadJob};
use tokio::sync::mpsc;
use tracing::trace;

/// A failure as reported by the transport, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RawFailure {
    #[error("timed out")]
    Timeout,

    #[error("connection reset")]
    ConnectionReset,

    #[error("network error: {0}")]
    Network(String),

    #[error("server responded {status}: {body}")]
    Http { status: u16, body: String },

    #[error("'{name}' already exists")]
    AlreadyExists { name: String },

    /// The store refused the file for its size.
    #[error("file of {size} bytes exceeds the upload limit")]
    TooLarge { size: u64 },

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for RawFailure {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => RawFailure::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                RawFailure::ConnectionReset
            }
            ErrorKind::AlreadyExists => RawFailure::AlreadyExists {
                name: String::new(),
            },
            ErrorKind::PermissionDenied => RawFailure::PermissionDenied(e.to_string()),
            _ => RawFailure::Other(e.to_string()),
        }
    }
}

/// Everything a transport needs to run one attempt of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub job_id: JobId,
    pub file_name: String,
    pub size_bytes: u64,
    pub destination: String,
    pub source: Option<PathBuf>,
    pub directive: DestinationDirective,
    pub attempt: u32,
}

impl TransferRequest {
    pub fn for_job(job: &UploadJob, directive: DestinationDirective) -> Self {
        Self {
            job_id: job.id.clone(),
            file_name: job.file_name.clone(),
            size_bytes: job.file_size_bytes,
            destination: job.destination.clone(),
            source: job.source.clone(),
            directive,
            attempt: job.attempts,
        }
    }
}

/// Boxed future returned by [`Transport::transfer`].
pub type TransferFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RawFailure>> + Send + 'a>>;

/// Moves the bytes of one job to the remote store.
pub trait Transport: Send + Sync {
    /// Runs one attempt.
    ///
    /// Progress is reported through `progress` in delivery order; the
    /// future resolves once the transfer succeeded or failed. Dropping the
    /// future abandons the attempt.
    fn transfer(&self, request: TransferRequest, progress: ProgressSink) -> TransferFuture<'_>;

    /// Best-effort signal to stop an in-flight transfer.
    fn abort(&self, job_id: &JobId);
}

/// Applies progress ticks for one job without blocking the transport.
///
/// Each tick updates the tracker under the job's own lock and enqueues a
/// `job-progress` event without waiting on the consumer. Ticks that arrive
/// after the job left `Uploading` are dropped.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    tracker: Arc<JobTracker>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ProgressSink {
    pub fn new(
        job_id: JobId,
        tracker: Arc<JobTracker>,
        events_tx: mpsc::UnboundedSender<UploadEvent>,
    ) -> Self {
        Self {
            job_id,
            tracker,
            events_tx,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Reports `loaded` of `total` bytes transferred.
    pub fn report(&self, loaded: u64, total: u64) {
        match self.tracker.record_progress(&self.job_id, loaded, total) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                trace!(job = %self.job_id, error = %e, "progress for untracked job");
                return;
            }
        }

        let Some(job) = self.tracker.get_job(&self.job_id) else {
            return;
        };
        let event = UploadEvent::JobProgress {
            job_id: self.job_id.clone(),
            loaded: job.bytes_loaded,
            total: job.file_size_bytes,
            percent: job.percent(),
        };
        if self.events_tx.send(event).is_err() {
            trace!(job = %self.job_id, "no event subscriber for progress");
        }
    }
}
