use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use docdrop_protocol::{ClassifiedError, FileSpec, JobId, JobStatus};
use tracing::debug;

use crate::types::UploadJob;
use crate::validation::validate_file_name;
use crate::TrackerError;

type JobCell = Arc<Mutex<UploadJob>>;

/// Owns the authoritative state of every upload job (thread-safe).
///
/// The job table lock is only held to look up, insert, or remove an entry.
/// Transitions lock a single job, so progress ticks for different jobs never
/// contend and listing never waits on a transfer.
#[derive(Default)]
pub struct JobTracker {
    table: RwLock<JobTable>,
}

#[derive(Default)]
struct JobTable {
    /// Insertion order, for display only.
    order: Vec<JobId>,
    entries: HashMap<JobId, JobCell>,
}

fn lock_job(cell: &JobCell) -> MutexGuard<'_, UploadJob> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_table(&self) -> RwLockReadGuard<'_, JobTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, JobTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cell(&self, id: &JobId) -> Result<JobCell, TrackerError> {
        self.read_table()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownJob(id.clone()))
    }

    /// Creates a queued job and returns its id.
    pub fn create_job(
        &self,
        file_name: &str,
        size_bytes: i64,
        destination: &str,
    ) -> Result<JobId, TrackerError> {
        self.create_job_for(&FileSpec::new(file_name, size_bytes), destination)
    }

    /// Creates a queued job from a file spec, keeping its source path.
    pub fn create_job_for(
        &self,
        file: &FileSpec,
        destination: &str,
    ) -> Result<JobId, TrackerError> {
        validate_file_name(&file.name)?;
        let size = u64::try_from(file.size_bytes).map_err(|_| {
            TrackerError::InvalidInput(format!("negative file size: {}", file.size_bytes))
        })?;

        let id = JobId::new();
        let mut job = UploadJob::new(id.clone(), file.name.clone(), size, destination);
        job.source = file.source.clone();

        let mut table = self.write_table();
        table.order.push(id.clone());
        table.entries.insert(id.clone(), Arc::new(Mutex::new(job)));
        debug!(job = %id, file = %file.name, size, "job created");
        Ok(id)
    }

    /// Moves a queued or failed job into `Uploading`.
    ///
    /// Resets loaded bytes, bumps the attempt counter, and returns the new
    /// attempt number.
    pub fn begin_uploading(&self, id: &JobId) -> Result<u32, TrackerError> {
        let cell = self.cell(id)?;
        let mut job = lock_job(&cell);
        match job.status {
            JobStatus::Queued | JobStatus::Error => {
                job.start_attempt(Instant::now());
                debug!(job = %id, attempt = job.attempts, "upload started");
                Ok(job.attempts)
            }
            from => Err(TrackerError::InvalidTransition {
                id: id.clone(),
                from,
                to: JobStatus::Uploading,
            }),
        }
    }

    /// Records a transport progress tick.
    ///
    /// Ticks for jobs that are not uploading are ignored: they race with
    /// completion and cancellation. Returns whether the tick was applied.
    pub fn record_progress(
        &self,
        id: &JobId,
        loaded: u64,
        total: u64,
    ) -> Result<bool, TrackerError> {
        let cell = self.cell(id)?;
        let mut job = lock_job(&cell);
        if job.status != JobStatus::Uploading {
            debug!(job = %id, status = %job.status, loaded, "ignoring progress tick");
            return Ok(false);
        }
        if total != job.file_size_bytes {
            debug!(job = %id, total, expected = job.file_size_bytes, "transport total differs from file size");
        }
        Ok(job.apply_progress(loaded, Instant::now()))
    }

    /// `Uploading -> Success`. Idempotent on an already successful job.
    pub fn mark_success(&self, id: &JobId) -> Result<(), TrackerError> {
        let cell = self.cell(id)?;
        let mut job = lock_job(&cell);
        match job.status {
            JobStatus::Success => Ok(()),
            JobStatus::Uploading => {
                job.status = JobStatus::Success;
                job.bytes_loaded = job.file_size_bytes;
                Ok(())
            }
            from => Err(TrackerError::InvalidTransition {
                id: id.clone(),
                from,
                to: JobStatus::Success,
            }),
        }
    }

    /// `Uploading -> Error`, storing the classified failure.
    pub fn mark_error(&self, id: &JobId, error: ClassifiedError) -> Result<(), TrackerError> {
        let cell = self.cell(id)?;
        let mut job = lock_job(&cell);
        if job.status != JobStatus::Uploading {
            return Err(TrackerError::InvalidTransition {
                id: id.clone(),
                from: job.status,
                to: JobStatus::Error,
            });
        }
        job.status = JobStatus::Error;
        job.throughput_bytes_per_sec = 0.0;
        job.last_error = Some(error);
        Ok(())
    }

    /// Cancels a job. Returns `false` if nothing changed (already
    /// successful or already cancelled).
    pub fn cancel(&self, id: &JobId) -> Result<bool, TrackerError> {
        let cell = self.cell(id)?;
        let mut job = lock_job(&cell);
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = JobStatus::Cancelled;
        job.throughput_bytes_per_sec = 0.0;
        Ok(true)
    }

    /// Deletes a finished job and returns its final state.
    pub fn remove(&self, id: &JobId) -> Result<UploadJob, TrackerError> {
        let mut table = self.write_table();
        let cell = table
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownJob(id.clone()))?;
        let job = lock_job(&cell).clone();
        if job.status.is_active() {
            return Err(TrackerError::JobActive(id.clone()));
        }
        table.entries.remove(id);
        table.order.retain(|j| j != id);
        Ok(job)
    }

    /// Returns a snapshot of a job.
    pub fn get_job(&self, id: &JobId) -> Option<UploadJob> {
        let cell = self.cell(id).ok()?;
        let job = lock_job(&cell).clone();
        Some(job)
    }

    /// Returns snapshots of every job in insertion order.
    pub fn all_jobs(&self) -> Vec<UploadJob> {
        let cells: Vec<JobCell> = {
            let table = self.read_table();
            table
                .order
                .iter()
                .filter_map(|id| table.entries.get(id).cloned())
                .collect()
        };
        cells.iter().map(|c| lock_job(c).clone()).collect()
    }

    /// Returns snapshots of the given jobs, skipping unknown ids.
    pub fn jobs(&self, ids: &[JobId]) -> Vec<UploadJob> {
        ids.iter().filter_map(|id| self.get_job(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.read_table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
