//! Upload engine: sessions, failure classification, retry, and recovery.
//!
//! This crate holds the **business logic** for uploading batches of files.
//! It has no UI and no network stack; the application supplies a
//! [`Transport`] implementation that moves the bytes.
//!
//! # Pipeline
//!
//! 1. **Submit**: validate the batch and create one queued job per file
//! 2. **Transfer**: hand each job to the transport, tracking progress
//! 3. **Classify**: sort failures into transient / permanent / conflict
//! 4. **Retry**: back off and retry transient failures automatically
//! 5. **Recover**: apply user choices (retry, overwrite, rename, skip)

pub mod classify;
pub mod config;
pub mod error;
pub mod local;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod transport;

// Re-export primary types for convenience.
pub use classify::{DEFAULT_MAX_FILE_SIZE, ErrorClassifier, human_size};
pub use config::{EngineConfig, default_config_path};
pub use error::UploadError;
pub use local::LocalDirTransport;
pub use recovery::{RecoveryChoice, RecoveryCoordinator, RecoveryPlan};
pub use retry::{RetryDecision, RetryPolicy};
pub use session::UploadManager;
pub use transport::{ProgressSink, RawFailure, TransferFuture, TransferRequest, Transport};
