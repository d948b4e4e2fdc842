use std::path::PathBuf;
use std::time::Instant;

use docdrop_protocol::{ClassifiedError, JobId, JobStatus};

/// One tracked file transfer.
///
/// Values handed out by [`JobTracker`](crate::JobTracker) are snapshots;
/// the tracker's copy is the only one that changes.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub id: JobId,
    pub file_name: String,
    pub file_size_bytes: u64,
    /// Target container or path in the remote store.
    pub destination: String,
    /// Local path of the bytes, if known.
    pub source: Option<PathBuf>,
    pub status: JobStatus,
    pub bytes_loaded: u64,
    /// Set each time the job (re-)enters `Uploading`.
    pub started_at: Option<Instant>,
    pub throughput_bytes_per_sec: f64,
    /// Number of times the job has entered `Uploading`.
    pub attempts: u32,
    pub last_error: Option<ClassifiedError>,
}

impl UploadJob {
    /// Creates a queued job.
    pub fn new(
        id: JobId,
        file_name: impl Into<String>,
        file_size_bytes: u64,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            file_size_bytes,
            destination: destination.into(),
            source: None,
            status: JobStatus::Queued,
            bytes_loaded: 0,
            started_at: None,
            throughput_bytes_per_sec: 0.0,
            attempts: 0,
            last_error: None,
        }
    }

    /// Starts a new attempt at `now`.
    pub(crate) fn start_attempt(&mut self, now: Instant) {
        self.status = JobStatus::Uploading;
        self.bytes_loaded = 0;
        self.throughput_bytes_per_sec = 0.0;
        self.started_at = Some(now);
        self.attempts += 1;
        self.last_error = None;
    }

    /// Applies a progress tick observed at `now`.
    ///
    /// `loaded` is clamped to the file size and never moves backwards within
    /// an attempt. Returns `false` if the tick was stale.
    pub fn apply_progress(&mut self, loaded: u64, now: Instant) -> bool {
        let loaded = loaded.min(self.file_size_bytes);
        if loaded < self.bytes_loaded {
            return false;
        }
        self.bytes_loaded = loaded;
        self.throughput_bytes_per_sec = match self.started_at {
            Some(started) => {
                let elapsed = now.saturating_duration_since(started).as_secs_f64();
                if elapsed > 0.0 {
                    self.bytes_loaded as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        true
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.file_size_bytes.saturating_sub(self.bytes_loaded)
    }

    /// Seconds left at the current throughput; `None` while throughput is zero.
    pub fn eta_seconds(&self) -> Option<f64> {
        if self.throughput_bytes_per_sec <= 0.0 {
            return None;
        }
        Some(self.remaining_bytes() as f64 / self.throughput_bytes_per_sec)
    }

    /// Percent of this file transferred (0-100).
    pub fn percent(&self) -> f64 {
        if self.file_size_bytes == 0 {
            return if self.status == JobStatus::Success {
                100.0
            } else {
                0.0
            };
        }
        self.bytes_loaded as f64 * 100.0 / self.file_size_bytes as f64
    }
}
