//! Shared types exchanged between the upload engine and its consumers.
//!
//! Everything here is plain data: job identifiers, status enums, classified
//! errors with their recovery actions, and the typed event stream the
//! presentation layer subscribes to.

pub mod events;
pub mod types;

// Re-export primary types for convenience.
pub use events::UploadEvent;
pub use types::{
    ClassifiedError, DestinationDirective, ErrorKind, FileSpec, JobId, JobResult, JobStatus,
    PromptOption, RecoveryAction, SessionId,
};
