use serde::{Deserialize, Serialize};

use crate::types::{ClassifiedError, JobId, JobResult, RecoveryAction, SessionId};

/// Ordered lifecycle events emitted per session.
///
/// Serialized with an `event` tag carrying the kebab-case event name
/// (`session-started`, `job-progress`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UploadEvent {
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: SessionId,
        job_ids: Vec<JobId>,
    },
    #[serde(rename_all = "camelCase")]
    JobProgress {
        job_id: JobId,
        loaded: u64,
        total: u64,
        percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    JobSuccess { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    JobError {
        job_id: JobId,
        classified_error: ClassifiedError,
        recovery_action: RecoveryAction,
        attempts: u32,
    },
    /// Emitted before the back-off delay starts, so consumers can show it.
    #[serde(rename_all = "camelCase")]
    JobRetrying {
        job_id: JobId,
        attempt: u32,
        max_attempts: u32,
        delay_seconds: f64,
    },
    /// A name conflict was resolved with overwrite or rename.
    #[serde(rename_all = "camelCase")]
    JobResolved { job_id: JobId, choice: String },
    #[serde(rename_all = "camelCase")]
    JobCancelled { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    JobRemoved { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    SessionComplete {
        session_id: SessionId,
        results: Vec<JobResult>,
    },
}

impl UploadEvent {
    /// The job this event concerns, if it is job-scoped.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            UploadEvent::JobProgress { job_id, .. }
            | UploadEvent::JobSuccess { job_id }
            | UploadEvent::JobError { job_id, .. }
            | UploadEvent::JobRetrying { job_id, .. }
            | UploadEvent::JobResolved { job_id, .. }
            | UploadEvent::JobCancelled { job_id }
            | UploadEvent::JobRemoved { job_id } => Some(job_id),
            UploadEvent::SessionStarted { .. } | UploadEvent::SessionComplete { .. } => None,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::SessionStarted { .. } => "session-started",
            UploadEvent::JobProgress { .. } => "job-progress",
            UploadEvent::JobSuccess { .. } => "job-success",
            UploadEvent::JobError { .. } => "job-error",
            UploadEvent::JobRetrying { .. } => "job-retrying",
            UploadEvent::JobResolved { .. } => "job-resolved",
            UploadEvent::JobCancelled { .. } => "job-cancelled",
            UploadEvent::JobRemoved { .. } => "job-removed",
            UploadEvent::SessionComplete { .. } => "session-complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    #[test]
    fn tag_matches_name() {
        let events = vec![
            UploadEvent::SessionStarted {
                session_id: SessionId::from("s1"),
                job_ids: vec![JobId::from("j1")],
            },
            UploadEvent::JobProgress {
                job_id: JobId::from("j1"),
                loaded: 5,
                total: 10,
                percent: 50.0,
            },
            UploadEvent::JobRetrying {
                job_id: JobId::from("j1"),
                attempt: 2,
                max_attempts: 3,
                delay_seconds: 2.0,
            },
            UploadEvent::JobRemoved {
                job_id: JobId::from("j1"),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[test]
    fn field_names_are_camel_case() {
        let event = UploadEvent::JobRetrying {
            job_id: JobId::from("j1"),
            attempt: 2,
            max_attempts: 3,
            delay_seconds: 4.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["maxAttempts"], 3);
        assert_eq!(json["delaySeconds"], 4.0);
    }

    #[test]
    fn session_complete_parses() {
        let json = r#"{"event":"session-complete","sessionId":"s1","results":[
            {"jobId":"j1","fileName":"a.txt","status":"success","attempts":1}]}"#;
        let event: UploadEvent = serde_json::from_str(json).unwrap();
        match event {
            UploadEvent::SessionComplete { results, .. } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].status, JobStatus::Success);
                assert!(results[0].succeeded());
                assert!(results[0].error.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn job_id_accessor() {
        let event = UploadEvent::JobSuccess {
            job_id: JobId::from("j9"),
        };
        assert_eq!(event.job_id().map(JobId::as_str), Some("j9"));

        let event = UploadEvent::SessionStarted {
            session_id: SessionId::from("s"),
            job_ids: vec![],
        };
        assert!(event.job_id().is_none());
    }
}
