//! Upload sessions: batch submission, per-job drivers, and recovery.
//!
//! Each submitted file gets a driver task that runs attempts through the
//! [`Transport`], classifies failures, and sleeps out automatic retries.
//! Lifecycle transitions and their events happen together under one short
//! registry lock, so consumers see a consistent order per session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use docdrop_protocol::{
    DestinationDirective, ErrorKind, FileSpec, JobId, JobResult, JobStatus, SessionId,
    UploadEvent,
};
use docdrop_transfer::{JobTracker, ProgressSummary, UploadJob, summarize};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::ErrorClassifier;
use crate::config::EngineConfig;
use crate::error::UploadError;
use crate::recovery::{RecoveryChoice, RecoveryCoordinator, RecoveryPlan};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{ProgressSink, TransferRequest, Transport};

/// Runs upload sessions against a [`Transport`].
///
/// Must be used from within a Tokio runtime: submitting and resolving jobs
/// spawn driver tasks. Dropping the manager stops every driver.
pub struct UploadManager {
    inner: Arc<Inner>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
}

struct Inner {
    tracker: Arc<JobTracker>,
    transport: Arc<dyn Transport>,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
    recovery: RecoveryCoordinator,
    limiter: Option<Arc<Semaphore>>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionState>,
    job_sessions: HashMap<JobId, SessionId>,
    /// Jobs that currently have a driver, keyed to that driver's run.
    in_flight: HashMap<JobId, Run>,
    next_run: u64,
}

struct SessionState {
    job_ids: Vec<JobId>,
    complete_reported: bool,
}

struct Run {
    id: u64,
    cancel: CancellationToken,
}

impl Registry {
    /// Hands `job_id` to a new driver run, cancelling any previous one.
    fn claim(&mut self, job_id: &JobId, shutdown: &CancellationToken) -> (u64, CancellationToken) {
        if let Some(previous) = self.in_flight.remove(job_id) {
            previous.cancel.cancel();
        }
        self.next_run += 1;
        let cancel = shutdown.child_token();
        self.in_flight.insert(
            job_id.clone(),
            Run {
                id: self.next_run,
                cancel: cancel.clone(),
            },
        );
        (self.next_run, cancel)
    }

    fn owns(&self, job_id: &JobId, run: u64) -> bool {
        self.in_flight.get(job_id).is_some_and(|r| r.id == run)
    }

    fn release(&mut self, job_id: &JobId, run: u64) -> bool {
        if self.owns(job_id, run) {
            self.in_flight.remove(job_id);
            true
        } else {
            false
        }
    }

    /// Drops a removed job from its session and returns that session.
    fn forget(&mut self, job_id: &JobId) -> Option<SessionId> {
        self.in_flight.remove(job_id);
        let session_id = self.job_sessions.remove(job_id)?;
        if let Some(state) = self.sessions.get_mut(&session_id) {
            state.job_ids.retain(|id| id != job_id);
        }
        Some(session_id)
    }

    fn session_jobs(&self, session_id: &SessionId) -> Result<Vec<JobId>, UploadError> {
        self.sessions
            .get(session_id)
            .map(|s| s.job_ids.clone())
            .ok_or_else(|| UploadError::UnknownSession(session_id.clone()))
    }
}

impl UploadManager {
    /// Creates a manager that moves bytes through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            tracker: Arc::new(JobTracker::new()),
            transport,
            classifier: config.classifier(),
            policy: config.retry_policy(),
            recovery: RecoveryCoordinator::new(),
            limiter: config
                .concurrency_limit()
                .map(|n| Arc::new(Semaphore::new(n))),
            events_tx,
            registry: Mutex::new(Registry::default()),
            shutdown: CancellationToken::new(),
        };
        Self {
            inner: Arc::new(inner),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// The job tracker shared by every session of this manager.
    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.inner.tracker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Starts a session uploading `files` to `destination`.
    ///
    /// The batch is all-or-nothing: if any file is rejected no job is
    /// created and no event is emitted.
    pub fn submit(
        &self,
        files: Vec<FileSpec>,
        destination: &str,
    ) -> Result<SessionId, UploadError> {
        if files.is_empty() {
            return Err(UploadError::EmptyBatch);
        }

        let tracker = &self.inner.tracker;
        let mut job_ids = Vec::with_capacity(files.len());
        for file in &files {
            match tracker.create_job_for(file, destination) {
                Ok(id) => job_ids.push(id),
                Err(e) => {
                    warn!(file = %file.name, error = %e, "rejecting upload batch");
                    for id in &job_ids {
                        let _ = tracker.cancel(id);
                        let _ = tracker.remove(id);
                    }
                    return Err(e.into());
                }
            }
        }

        let session_id = SessionId::new();
        let runs = {
            let mut reg = self.inner.registry();
            reg.sessions.insert(
                session_id.clone(),
                SessionState {
                    job_ids: job_ids.clone(),
                    complete_reported: false,
                },
            );
            let runs: Vec<_> = job_ids
                .iter()
                .map(|id| {
                    reg.job_sessions.insert(id.clone(), session_id.clone());
                    let (run, cancel) = reg.claim(id, &self.inner.shutdown);
                    (id.clone(), run, cancel)
                })
                .collect();
            self.inner.emit(UploadEvent::SessionStarted {
                session_id: session_id.clone(),
                job_ids: job_ids.clone(),
            });
            runs
        };
        info!(session = %session_id, jobs = job_ids.len(), destination, "upload session started");

        for (job_id, run, cancel) in runs {
            self.inner.spawn_driver(job_id, run, DestinationDirective::Normal, cancel);
        }
        Ok(session_id)
    }

    /// Cancels one job. Returns `false` if it had already finished.
    ///
    /// State changes immediately; the transport is asked to abort but not
    /// awaited.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<bool, UploadError> {
        let (changed, aborted) = {
            let mut reg = self.inner.registry();
            let (changed, aborted) = self.inner.cancel_locked(&mut reg, job_id)?;
            if let Some(session_id) = reg.job_sessions.get(job_id).cloned() {
                self.inner.check_complete(&mut reg, &session_id);
            }
            (changed, aborted)
        };
        if aborted {
            self.inner.transport.abort(job_id);
        }
        Ok(changed)
    }

    /// Cancels every unfinished job of a session and tears the session
    /// down. Returns how many jobs changed state.
    ///
    /// `session-complete` is reported before the jobs are removed, so
    /// subscribers still see every job's final status.
    pub fn cancel_session(&self, session_id: &SessionId) -> Result<usize, UploadError> {
        let (cancelled, aborted) = {
            let mut reg = self.inner.registry();
            let job_ids = reg.session_jobs(session_id)?;
            let mut cancelled = 0;
            let mut aborted = Vec::new();
            for id in &job_ids {
                let (changed, was_running) = self.inner.cancel_locked(&mut reg, id)?;
                if changed {
                    cancelled += 1;
                }
                if was_running {
                    aborted.push(id.clone());
                }
            }
            self.inner.check_complete(&mut reg, session_id);
            self.inner.remove_settled(&mut reg, session_id)?;
            (cancelled, aborted)
        };
        for id in &aborted {
            self.inner.transport.abort(id);
        }
        info!(session = %session_id, cancelled, "upload session cancelled");
        Ok(cancelled)
    }

    /// Removes finished jobs (succeeded, failed, cancelled) from a session.
    ///
    /// Jobs still running or waiting for an automatic retry stay. The
    /// session itself is dropped once it has no jobs left.
    pub fn clear_completed(&self, session_id: &SessionId) -> Result<Vec<JobId>, UploadError> {
        let mut reg = self.inner.registry();
        self.inner.remove_settled(&mut reg, session_id)
    }

    /// Retries a failed job now, bypassing the automatic ceiling.
    pub fn retry(&self, job_id: &JobId) -> Result<(), UploadError> {
        self.resolve(job_id, RecoveryChoice::Retry.as_str())
    }

    /// Applies a user's recovery choice (`"retry"`, `"overwrite"`,
    /// `"rename"`, `"skip"`, `"discard"`) to a failed job.
    pub fn resolve(&self, job_id: &JobId, choice: &str) -> Result<(), UploadError> {
        let choice =
            RecoveryChoice::from_value(choice).ok_or_else(|| UploadError::InvalidChoice {
                job_id: job_id.clone(),
                choice: choice.to_string(),
            })?;

        let mut reg = self.inner.registry();
        let job = self
            .inner
            .tracker
            .get_job(job_id)
            .ok_or_else(|| docdrop_transfer::TrackerError::UnknownJob(job_id.clone()))?;
        let plan = self.inner.recovery.plan(&job, choice)?;

        match plan {
            RecoveryPlan::Restart { directive } => {
                if choice == RecoveryChoice::Retry {
                    self.inner.emit(UploadEvent::JobRetrying {
                        job_id: job_id.clone(),
                        attempt: job.attempts + 1,
                        max_attempts: self.inner.policy.max_attempts,
                        delay_seconds: 0.0,
                    });
                } else {
                    self.inner.emit(UploadEvent::JobResolved {
                        job_id: job_id.clone(),
                        choice: choice.to_string(),
                    });
                }
                if let Some(session_id) = reg.job_sessions.get(job_id).cloned()
                    && let Some(state) = reg.sessions.get_mut(&session_id)
                {
                    state.complete_reported = false;
                }
                let (run, cancel) = reg.claim(job_id, &self.inner.shutdown);
                drop(reg);
                info!(job = %job_id, %choice, "restarting failed upload");
                self.inner.spawn_driver(job_id.clone(), run, directive, cancel);
            }
            RecoveryPlan::Remove => {
                if let Some(run) = reg.in_flight.remove(job_id) {
                    run.cancel.cancel();
                }
                self.inner.tracker.cancel(job_id)?;
                self.inner.tracker.remove(job_id)?;
                let session_id = reg.forget(job_id);
                self.inner.emit(UploadEvent::JobRemoved {
                    job_id: job_id.clone(),
                });
                info!(job = %job_id, %choice, "failed upload dropped");
                if let Some(session_id) = session_id {
                    self.inner.check_complete(&mut reg, &session_id);
                }
            }
        }
        Ok(())
    }

    /// Choices currently available for a job; empty unless it failed.
    pub fn choices(&self, job_id: &JobId) -> Vec<RecoveryChoice> {
        self.inner
            .tracker
            .get_job(job_id)
            .map(|job| self.inner.recovery.choices(&job))
            .unwrap_or_default()
    }

    /// Snapshots of a session's jobs in submission order.
    pub fn jobs(&self, session_id: &SessionId) -> Result<Vec<UploadJob>, UploadError> {
        let job_ids = self.inner.registry().session_jobs(session_id)?;
        Ok(self.inner.tracker.jobs(&job_ids))
    }

    /// Aggregate progress of one session.
    pub fn summary(&self, session_id: &SessionId) -> Result<ProgressSummary, UploadError> {
        Ok(summarize(&self.jobs(session_id)?))
    }

    /// Aggregate progress over every tracked job.
    pub fn overall_summary(&self) -> ProgressSummary {
        summarize(&self.inner.tracker.all_jobs())
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.registry().sessions.keys().cloned().collect()
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        let running: Vec<JobId> = {
            let mut reg = self.inner.registry();
            reg.in_flight.drain().map(|(id, _)| id).collect()
        };
        self.inner.shutdown.cancel();
        for id in &running {
            self.inner.transport.abort(id);
        }
        if !running.is_empty() {
            debug!(jobs = running.len(), "upload manager dropped, transfers aborted");
        }
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: UploadEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("no event subscriber");
        }
    }

    fn spawn_driver(
        self: &Arc<Self>,
        job_id: JobId,
        run: u64,
        directive: DestinationDirective,
        cancel: CancellationToken,
    ) {
        tokio::spawn(Arc::clone(self).drive(job_id, run, directive, cancel));
    }

    /// Returns `(state changed, had a driver)`.
    fn cancel_locked(
        &self,
        reg: &mut Registry,
        job_id: &JobId,
    ) -> Result<(bool, bool), UploadError> {
        let changed = self.tracker.cancel(job_id)?;
        let run = reg.in_flight.remove(job_id);
        if changed {
            self.emit(UploadEvent::JobCancelled {
                job_id: job_id.clone(),
            });
            info!(job = %job_id, "upload cancelled");
        }
        let had_driver = match run {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        };
        Ok((changed, had_driver))
    }

    /// Removes every job of the session that has no driver and is no
    /// longer active, then drops the session if nothing is left.
    fn remove_settled(
        &self,
        reg: &mut Registry,
        session_id: &SessionId,
    ) -> Result<Vec<JobId>, UploadError> {
        let job_ids = reg.session_jobs(session_id)?;
        let mut removed = Vec::new();
        for id in job_ids {
            if reg.in_flight.contains_key(&id) {
                continue;
            }
            match self.tracker.remove(&id) {
                Ok(_) => {
                    reg.forget(&id);
                    self.emit(UploadEvent::JobRemoved { job_id: id.clone() });
                    removed.push(id);
                }
                Err(docdrop_transfer::TrackerError::JobActive(_)) => {}
                Err(docdrop_transfer::TrackerError::UnknownJob(_)) => {
                    reg.forget(&id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if reg
            .sessions
            .get(session_id)
            .is_some_and(|s| s.job_ids.is_empty())
        {
            reg.sessions.remove(session_id);
            debug!(session = %session_id, "session cleared");
        }
        Ok(removed)
    }

    /// Emits `session-complete` once every job of the session settled.
    fn check_complete(&self, reg: &mut Registry, session_id: &SessionId) {
        let Registry {
            sessions,
            in_flight,
            ..
        } = reg;
        let Some(state) = sessions.get_mut(session_id) else {
            return;
        };
        if state.complete_reported || state.job_ids.iter().any(|id| in_flight.contains_key(id)) {
            return;
        }
        let jobs = self.tracker.jobs(&state.job_ids);
        if jobs.iter().any(|job| job.status.is_active()) {
            return;
        }
        state.complete_reported = true;

        let results: Vec<JobResult> = jobs
            .iter()
            .map(|job| job_result(job, &self.recovery))
            .collect();
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        info!(
            session = %session_id,
            succeeded,
            failed = results.len() - succeeded,
            "upload session complete"
        );
        self.emit(UploadEvent::SessionComplete {
            session_id: session_id.clone(),
            results,
        });
    }

    /// Releases the run and checks whether its session is now complete.
    fn finish(&self, reg: &mut Registry, job_id: &JobId, run: u64) {
        if reg.release(job_id, run)
            && let Some(session_id) = reg.job_sessions.get(job_id).cloned()
        {
            self.check_complete(reg, &session_id);
        }
    }

    /// Drives one job until it succeeds, fails for good, or loses its run.
    async fn drive(
        self: Arc<Self>,
        job_id: JobId,
        run: u64,
        directive: DestinationDirective,
        cancel: CancellationToken,
    ) {
        loop {
            let permit = match &self.limiter {
                Some(limiter) => {
                    let acquired = tokio::select! {
                        _ = cancel.cancelled() => None,
                        permit = Arc::clone(limiter).acquire_owned() => permit.ok(),
                    };
                    match acquired {
                        Some(permit) => Some(permit),
                        None => return,
                    }
                }
                None => None,
            };

            let request = {
                let mut reg = self.registry();
                if !reg.owns(&job_id, run) {
                    return;
                }
                let started = self
                    .tracker
                    .begin_uploading(&job_id)
                    .map_err(UploadError::from)
                    .and_then(|_| {
                        self.tracker
                            .get_job(&job_id)
                            .ok_or_else(|| docdrop_transfer::TrackerError::UnknownJob(job_id.clone()).into())
                    });
                match started {
                    Ok(job) => TransferRequest::for_job(&job, directive),
                    Err(e) => {
                        warn!(job = %job_id, error = %e, "cannot start upload");
                        self.finish(&mut reg, &job_id, run);
                        return;
                    }
                }
            };
            let attempt = request.attempt;
            debug!(job = %job_id, attempt, ?directive, "transfer started");

            let sink = ProgressSink::new(
                job_id.clone(),
                Arc::clone(&self.tracker),
                self.events_tx.clone(),
            );
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.transport.transfer(request, sink) => result,
            };
            drop(permit);

            let delay = {
                let mut reg = self.registry();
                if !reg.owns(&job_id, run) {
                    return;
                }
                match result {
                    Ok(()) => {
                        match self.tracker.mark_success(&job_id) {
                            Ok(()) => {
                                info!(job = %job_id, attempt, "upload succeeded");
                                self.emit(UploadEvent::JobSuccess {
                                    job_id: job_id.clone(),
                                });
                            }
                            Err(e) => warn!(job = %job_id, error = %e, "cannot record success"),
                        }
                        self.finish(&mut reg, &job_id, run);
                        return;
                    }
                    Err(failure) => {
                        let mut classified = self.classifier.classify(&failure);
                        warn!(
                            job = %job_id,
                            attempt,
                            kind = ?classified.kind,
                            error = %failure,
                            "upload attempt failed"
                        );
                        if classified.kind == ErrorKind::Transient
                            && self.policy.is_exhausted(attempt)
                        {
                            classified = self.recovery.exhausted(classified, attempt);
                        }
                        if let Err(e) = self.tracker.mark_error(&job_id, classified.clone()) {
                            warn!(job = %job_id, error = %e, "cannot record failure");
                            self.finish(&mut reg, &job_id, run);
                            return;
                        }
                        let Some(job) = self.tracker.get_job(&job_id) else {
                            self.finish(&mut reg, &job_id, run);
                            return;
                        };

                        match self.policy.should_retry(&job) {
                            RetryDecision::Retry {
                                next_attempt,
                                delay,
                            } => {
                                info!(
                                    job = %job_id,
                                    next_attempt,
                                    delay_secs = delay.as_secs_f64(),
                                    "retrying upload"
                                );
                                self.emit(UploadEvent::JobRetrying {
                                    job_id: job_id.clone(),
                                    attempt: next_attempt,
                                    max_attempts: self.policy.max_attempts,
                                    delay_seconds: delay.as_secs_f64(),
                                });
                                delay
                            }
                            RetryDecision::Stop => {
                                error!(
                                    job = %job_id,
                                    attempts = job.attempts,
                                    error = %classified.message,
                                    "upload failed"
                                );
                                self.emit(UploadEvent::JobError {
                                    job_id: job_id.clone(),
                                    recovery_action: self.recovery.offered_action(&job),
                                    classified_error: self.recovery.surfaced(&classified),
                                    attempts: job.attempts,
                                });
                                self.finish(&mut reg, &job_id, run);
                                return;
                            }
                        }
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn job_result(job: &UploadJob, recovery: &RecoveryCoordinator) -> JobResult {
    JobResult {
        job_id: job.id.clone(),
        file_name: job.file_name.clone(),
        status: job.status,
        attempts: job.attempts,
        error: match (&job.status, &job.last_error) {
            (JobStatus::Error, Some(error)) => Some(recovery.surfaced(error)),
            _ => None,
        },
    }
}
