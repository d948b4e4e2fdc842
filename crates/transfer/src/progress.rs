use docdrop_protocol::JobStatus;

use crate::types::UploadJob;

/// Session-wide figures derived from a set of jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSummary {
    pub job_count: usize,
    pub total_bytes: u64,
    pub loaded_bytes: u64,
    /// Overall completion in `[0, 100]`.
    pub percent: f64,
    /// Sum of per-job throughput over jobs currently uploading.
    pub throughput_bytes_per_sec: f64,
    /// `None` while nothing is moving.
    pub eta_seconds: Option<f64>,
    pub queued: usize,
    pub uploading: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ProgressSummary {
    /// Returns `true` when no job is queued or uploading.
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.uploading == 0
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.loaded_bytes)
    }
}

/// Aggregates progress over `jobs` in one pass.
///
/// With no bytes to move, percent is 100 only if every job succeeded and
/// 0 otherwise.
pub fn summarize<'a, I>(jobs: I) -> ProgressSummary
where
    I: IntoIterator<Item = &'a UploadJob>,
{
    let mut s = ProgressSummary::default();
    let mut all_succeeded = true;

    for job in jobs {
        s.job_count += 1;
        s.total_bytes += job.file_size_bytes;
        s.loaded_bytes += job.bytes_loaded.min(job.file_size_bytes);
        match job.status {
            JobStatus::Queued => s.queued += 1,
            JobStatus::Uploading => {
                s.uploading += 1;
                s.throughput_bytes_per_sec += job.throughput_bytes_per_sec;
            }
            JobStatus::Success => s.succeeded += 1,
            JobStatus::Error => s.failed += 1,
            JobStatus::Cancelled => s.cancelled += 1,
        }
        if job.status != JobStatus::Success {
            all_succeeded = false;
        }
    }

    s.percent = if s.total_bytes == 0 {
        if s.job_count > 0 && all_succeeded {
            100.0
        } else {
            0.0
        }
    } else {
        (s.loaded_bytes as f64 * 100.0 / s.total_bytes as f64).clamp(0.0, 100.0)
    };

    if s.throughput_bytes_per_sec > 0.0 {
        s.eta_seconds = Some(s.remaining_bytes() as f64 / s.throughput_bytes_per_sec);
    }

    s
}
