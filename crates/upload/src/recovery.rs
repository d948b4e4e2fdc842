//! Turning failed jobs into user choices and choices into plans.

use std::fmt;

use docdrop_protocol::{ClassifiedError, DestinationDirective, ErrorKind, JobStatus, RecoveryAction};
use docdrop_transfer::UploadJob;

use crate::error::UploadError;

/// A user decision about a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChoice {
    Retry,
    Overwrite,
    Rename,
    Skip,
    /// Drop the job whatever the failure was.
    Discard,
}

impl RecoveryChoice {
    /// Parses a prompt option value (`"overwrite"`, `"skip"`, ...).
    pub fn from_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retry" => Some(Self::Retry),
            "overwrite" => Some(Self::Overwrite),
            "rename" => Some(Self::Rename),
            "skip" => Some(Self::Skip),
            "discard" => Some(Self::Discard),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Overwrite => "overwrite",
            Self::Rename => "rename",
            Self::Skip => "skip",
            Self::Discard => "discard",
        }
    }
}

impl fmt::Display for RecoveryChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the session must do to apply a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPlan {
    /// Start a new attempt with the given directive.
    Restart { directive: DestinationDirective },
    /// Cancel the job and remove it from the tracker.
    Remove,
}

/// Decides which choices a failed job offers and what each one does.
///
/// The coordinator only reads jobs; [`UploadManager::resolve`] applies the
/// resulting plan through the tracker.
///
/// [`UploadManager::resolve`]: crate::UploadManager::resolve
#[derive(Debug, Clone, Default)]
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Choices available for `job`; empty unless it failed.
    ///
    /// Transient failures always offer a manual retry, also past the
    /// automatic attempt ceiling.
    pub fn choices(&self, job: &UploadJob) -> Vec<RecoveryChoice> {
        if job.status != JobStatus::Error {
            return Vec::new();
        }
        match job.last_error.as_ref().map(|e| e.kind) {
            Some(ErrorKind::Transient) => vec![RecoveryChoice::Retry, RecoveryChoice::Discard],
            Some(ErrorKind::NameConflict) => vec![
                RecoveryChoice::Overwrite,
                RecoveryChoice::Rename,
                RecoveryChoice::Skip,
                RecoveryChoice::Discard,
            ],
            Some(ErrorKind::Permanent) | None => vec![RecoveryChoice::Discard],
        }
    }

    /// The action advertised to the user in `job-error`.
    pub fn offered_action(&self, job: &UploadJob) -> RecoveryAction {
        job.last_error
            .as_ref()
            .map(|e| e.recovery_action.clone())
            .unwrap_or(RecoveryAction::None)
    }

    /// Validates `choice` against `job` and returns the plan to apply.
    pub fn plan(&self, job: &UploadJob, choice: RecoveryChoice) -> Result<RecoveryPlan, UploadError> {
        if job.status != JobStatus::Error {
            return Err(UploadError::NotRecoverable(job.id.clone()));
        }
        if !self.choices(job).contains(&choice) {
            return Err(UploadError::InvalidChoice {
                job_id: job.id.clone(),
                choice: choice.to_string(),
            });
        }
        let plan = match choice {
            RecoveryChoice::Retry => RecoveryPlan::Restart {
                directive: DestinationDirective::Normal,
            },
            RecoveryChoice::Overwrite => RecoveryPlan::Restart {
                directive: DestinationDirective::Overwrite,
            },
            RecoveryChoice::Rename => RecoveryPlan::Restart {
                directive: DestinationDirective::Rename,
            },
            RecoveryChoice::Skip | RecoveryChoice::Discard => RecoveryPlan::Remove,
        };
        Ok(plan)
    }

    /// Rewrites a transient error once automatic retries ran out.
    ///
    /// The kind stays `Transient` so a manual retry remains possible.
    pub fn exhausted(&self, error: ClassifiedError, attempts: u32) -> ClassifiedError {
        ClassifiedError {
            title: "Upload failed".into(),
            message: format!(
                "Gave up after {attempts} attempt{}: {}",
                if attempts == 1 { "" } else { "s" },
                error.message
            ),
            suggestion: "Retry once the connection is stable, or discard the file.".into(),
            ..error
        }
    }

    /// The error reported to subscribers once a job stopped for good.
    ///
    /// A transient error only stops after automatic retries ran out, so it
    /// is reported as permanent. The manual `Retry` action is kept, and the
    /// tracked error stays transient so [`choices`](Self::choices) still
    /// offers it.
    pub fn surfaced(&self, error: &ClassifiedError) -> ClassifiedError {
        let mut surfaced = error.clone();
        if surfaced.kind == ErrorKind::Transient {
            surfaced.kind = ErrorKind::Permanent;
        }
        surfaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClassifier;
    use crate::transport::RawFailure;
    use docdrop_protocol::JobId;

    fn failed(failure: RawFailure) -> UploadJob {
        let mut job = UploadJob::new(JobId::from("j1"), "a.txt", 10, "/docs");
        job.status = JobStatus::Error;
        job.attempts = 1;
        job.last_error = Some(ErrorClassifier::default().classify(&failure));
        job
    }

    #[test]
    fn parses_option_values() {
        assert_eq!(RecoveryChoice::from_value("skip"), Some(RecoveryChoice::Skip));
        assert_eq!(
            RecoveryChoice::from_value(" Overwrite "),
            Some(RecoveryChoice::Overwrite)
        );
        assert_eq!(RecoveryChoice::from_value("explode"), None);
        assert_eq!(RecoveryChoice::Rename.to_string(), "rename");
    }

    #[test]
    fn conflict_choices() {
        let job = failed(RawFailure::AlreadyExists {
            name: "a.txt".into(),
        });
        let coordinator = RecoveryCoordinator::new();
        assert_eq!(
            coordinator.plan(&job, RecoveryChoice::Overwrite).unwrap(),
            RecoveryPlan::Restart {
                directive: DestinationDirective::Overwrite
            }
        );
        assert_eq!(
            coordinator.plan(&job, RecoveryChoice::Rename).unwrap(),
            RecoveryPlan::Restart {
                directive: DestinationDirective::Rename
            }
        );
        assert_eq!(
            coordinator.plan(&job, RecoveryChoice::Skip).unwrap(),
            RecoveryPlan::Remove
        );
        assert!(matches!(
            coordinator.plan(&job, RecoveryChoice::Retry),
            Err(UploadError::InvalidChoice { .. })
        ));
        assert!(matches!(
            coordinator.offered_action(&job),
            RecoveryAction::Prompt { .. }
        ));
    }

    #[test]
    fn transient_allows_manual_retry_past_ceiling() {
        let mut job = failed(RawFailure::Timeout);
        job.attempts = 10;
        let coordinator = RecoveryCoordinator::new();
        assert_eq!(
            coordinator.plan(&job, RecoveryChoice::Retry).unwrap(),
            RecoveryPlan::Restart {
                directive: DestinationDirective::Normal
            }
        );
        assert!(coordinator.plan(&job, RecoveryChoice::Skip).is_err());
        assert_eq!(coordinator.offered_action(&job), RecoveryAction::Retry);
    }

    #[test]
    fn permanent_can_only_be_discarded() {
        let job = failed(RawFailure::PermissionDenied("ro".into()));
        let coordinator = RecoveryCoordinator::new();
        assert_eq!(coordinator.choices(&job), vec![RecoveryChoice::Discard]);
        assert_eq!(
            coordinator.plan(&job, RecoveryChoice::Discard).unwrap(),
            RecoveryPlan::Remove
        );
        assert!(coordinator.plan(&job, RecoveryChoice::Retry).is_err());
        assert_eq!(coordinator.offered_action(&job), RecoveryAction::None);
    }

    #[test]
    fn non_failed_job_is_not_recoverable() {
        let job = UploadJob::new(JobId::from("j1"), "a.txt", 10, "/docs");
        let coordinator = RecoveryCoordinator::new();
        assert!(coordinator.choices(&job).is_empty());
        assert!(matches!(
            coordinator.plan(&job, RecoveryChoice::Retry),
            Err(UploadError::NotRecoverable(_))
        ));
    }

    #[test]
    fn exhausted_keeps_kind_and_action() {
        let original = ErrorClassifier::default().classify(&RawFailure::Timeout);
        let surfaced = RecoveryCoordinator::new().exhausted(original.clone(), 3);
        assert_eq!(surfaced.kind, ErrorKind::Transient);
        assert_eq!(surfaced.recovery_action, RecoveryAction::Retry);
        assert!(surfaced.message.contains("3 attempts"));
        assert!(surfaced.message.contains(&original.message));
    }

    #[test]
    fn exhausted_error_is_reported_as_permanent() {
        let coordinator = RecoveryCoordinator::new();
        let exhausted =
            coordinator.exhausted(ErrorClassifier::default().classify(&RawFailure::Timeout), 3);
        let reported = coordinator.surfaced(&exhausted);
        assert_eq!(reported.kind, ErrorKind::Permanent);
        assert_eq!(reported.recovery_action, RecoveryAction::Retry);
        assert_eq!(reported.message, exhausted.message);

        let conflict = ErrorClassifier::default().classify(&RawFailure::AlreadyExists {
            name: "a.txt".into(),
        });
        assert_eq!(coordinator.surfaced(&conflict), conflict);
    }
}
