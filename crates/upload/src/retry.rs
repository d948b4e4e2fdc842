//! Automatic retry policy with attempt-indexed backoff.

use std::time::Duration;

use docdrop_protocol::{ErrorKind, JobStatus};
use docdrop_transfer::UploadJob;

/// Outcome of asking the policy about a failed job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Start attempt `next_attempt` after waiting `delay`.
    Retry { next_attempt: u32, delay: Duration },
    Stop,
}

/// Bounded automatic retries with exponential backoff.
///
/// The delay before attempt `n` (n >= 2) is
/// `initial_delay * backoff_factor^(n - 2)`, capped at `max_delay`.
/// No jitter: delays never decrease with the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier per subsequent attempt; values below 1 are treated as 1.
    pub backoff_factor: f64,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries automatically.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait before starting `attempt` (1-based). The first attempt
    /// starts immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(63) as i32;
        let factor = self.backoff_factor.max(1.0);
        let secs = self.initial_delay.as_secs_f64() * factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Decides whether a failed job is retried automatically.
    ///
    /// Only `Transient` failures qualify, and only while the job has made
    /// fewer than `max_attempts` attempts.
    pub fn should_retry(&self, job: &UploadJob) -> RetryDecision {
        if job.status != JobStatus::Error {
            return RetryDecision::Stop;
        }
        let transient = job
            .last_error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Transient);
        if !transient || self.is_exhausted(job.attempts) {
            return RetryDecision::Stop;
        }
        let next_attempt = job.attempts + 1;
        RetryDecision::Retry {
            next_attempt,
            delay: self.delay_for_attempt(next_attempt),
        }
    }

    /// Returns `true` once `attempts` reached the automatic ceiling.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docdrop_protocol::{ClassifiedError, JobId, RecoveryAction};

    fn failed_job(kind: ErrorKind, attempts: u32) -> UploadJob {
        let mut job = UploadJob::new(JobId::from("j1"), "a.txt", 10, "/docs");
        job.status = JobStatus::Error;
        job.attempts = attempts;
        job.last_error = Some(ClassifiedError {
            kind,
            title: String::new(),
            message: String::new(),
            suggestion: String::new(),
            recovery_action: RecoveryAction::None,
        });
        job
    }

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 3.0,
            max_delay: Duration::from_secs(10),
        };
        let mut last = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= last, "attempt {attempt}: {delay:?} < {last:?}");
            assert!(delay <= Duration::from_secs(10));
            last = delay;
        }
    }

    #[test]
    fn shrinking_factor_is_clamped() {
        let policy = RetryPolicy {
            backoff_factor: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.delay_for_attempt(3) >= policy.delay_for_attempt(2));
    }

    #[test]
    fn transient_retries_until_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.should_retry(&failed_job(ErrorKind::Transient, 1)),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.should_retry(&failed_job(ErrorKind::Transient, 2)),
            RetryDecision::Retry {
                next_attempt: 3,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(
            policy.should_retry(&failed_job(ErrorKind::Transient, 3)),
            RetryDecision::Stop
        );
    }

    #[test]
    fn permanent_and_conflict_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.should_retry(&failed_job(ErrorKind::Permanent, 1)),
            RetryDecision::Stop
        );
        assert_eq!(
            policy.should_retry(&failed_job(ErrorKind::NameConflict, 1)),
            RetryDecision::Stop
        );
    }

    #[test]
    fn non_failed_jobs_stop() {
        let policy = RetryPolicy::default();
        let job = UploadJob::new(JobId::from("j1"), "a.txt", 10, "/docs");
        assert_eq!(policy.should_retry(&job), RetryDecision::Stop);
    }

    #[test]
    fn none_policy_stops_after_first_attempt() {
        let policy = RetryPolicy::none();
        assert_eq!(
            policy.should_retry(&failed_job(ErrorKind::Transient, 1)),
            RetryDecision::Stop
        );
    }
}
