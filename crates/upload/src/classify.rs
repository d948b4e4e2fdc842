//! Sorting raw transport failures into transient / permanent / conflict.

use docdrop_protocol::{ClassifiedError, ErrorKind, PromptOption, RecoveryAction};

use crate::transport::RawFailure;

/// Default hard ceiling on a single file: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maps raw transport failures to [`ClassifiedError`]s.
///
/// Rules, first match wins:
/// 1. the store reports the name is taken -> `NameConflict`
/// 2. timeouts, resets, 5xx, throttling, momentary quota -> `Transient`
/// 3. anything else -> `Permanent`
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_file_size: u64,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_SIZE)
    }
}

impl ErrorClassifier {
    /// Creates a classifier that treats files above `max_file_size` bytes
    /// as permanently too large.
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn classify(&self, failure: &RawFailure) -> ClassifiedError {
        if let Some(error) = self.name_conflict(failure) {
            return error;
        }
        if let Some(error) = self.transient(failure) {
            return error;
        }
        self.permanent(failure)
    }

    fn name_conflict(&self, failure: &RawFailure) -> Option<ClassifiedError> {
        let name = match failure {
            RawFailure::AlreadyExists { name } => Some(name.as_str()).filter(|n| !n.is_empty()),
            RawFailure::Http { status: 409, .. } => None,
            RawFailure::Http { body, .. } | RawFailure::Other(body)
                if mentions_conflict(body) =>
            {
                None
            }
            _ => return None,
        };
        let message = match name {
            Some(name) => format!("A file named \"{name}\" already exists in this location."),
            None => "A file with the same name already exists in this location.".to_string(),
        };
        Some(classified(
            ErrorKind::NameConflict,
            "File already exists",
            message,
            "Choose whether to overwrite the existing file, keep both, or skip this file.",
        ))
    }

    fn transient(&self, failure: &RawFailure) -> Option<ClassifiedError> {
        let error = match failure {
            RawFailure::Timeout => classified(
                ErrorKind::Transient,
                "Upload timed out",
                "The server took too long to respond.",
                "Check your connection; the upload will be retried.",
            ),
            RawFailure::ConnectionReset | RawFailure::Network(_) => classified(
                ErrorKind::Transient,
                "Network error",
                format!("The connection was interrupted ({failure})."),
                "Check your connection; the upload will be retried.",
            ),
            RawFailure::Http { status, .. } if *status >= 500 && *status < 600 => classified(
                ErrorKind::Transient,
                "Server error",
                format!("The server could not process the upload (HTTP {status})."),
                "The server may be busy; the upload will be retried.",
            ),
            RawFailure::Http {
                status: 408 | 429, ..
            } => classified(
                ErrorKind::Transient,
                "Server busy",
                "The server asked to slow down.",
                "Wait a moment; the upload will be retried.",
            ),
            RawFailure::QuotaExceeded => classified(
                ErrorKind::Transient,
                "Storage limit reached",
                "The upload was refused by a storage quota check.",
                "Free up space or wait for the quota to reset, then retry.",
            ),
            RawFailure::TooLarge { size } if *size <= self.max_file_size => classified(
                ErrorKind::Transient,
                "Upload limit reached",
                format!(
                    "The server refused {} even though it is within the {} limit.",
                    human_size(*size),
                    human_size(self.max_file_size)
                ),
                "The limit may be temporary; the upload will be retried.",
            ),
            RawFailure::Other(text) if mentions_timeout(text) => classified(
                ErrorKind::Transient,
                "Network error",
                format!("The upload was interrupted: {text}"),
                "Check your connection; the upload will be retried.",
            ),
            _ => return None,
        };
        Some(error)
    }

    fn permanent(&self, failure: &RawFailure) -> ClassifiedError {
        match failure {
            RawFailure::TooLarge { .. } | RawFailure::Http { status: 413, .. } => {
                let size = match failure {
                    RawFailure::TooLarge { size } => format!(" ({})", human_size(*size)),
                    _ => String::new(),
                };
                classified(
                    ErrorKind::Permanent,
                    "File too large",
                    format!("This file{size} exceeds the maximum upload size."),
                    format!(
                        "Files must be smaller than {}. Compress or split the file and try again.",
                        human_size(self.max_file_size)
                    ),
                )
            }
            RawFailure::PermissionDenied(_) | RawFailure::Http { status: 401 | 403, .. } => {
                classified(
                    ErrorKind::Permanent,
                    "Permission denied",
                    "You do not have permission to upload to this location.",
                    "Ask the space owner for write access or choose another destination.",
                )
            }
            RawFailure::UnsupportedType(kind) => classified(
                ErrorKind::Permanent,
                "Unsupported file type",
                format!("Files of type \"{kind}\" cannot be uploaded here."),
                "Convert the file to a supported format and try again.",
            ),
            RawFailure::Http { status: 415, .. } => classified(
                ErrorKind::Permanent,
                "Unsupported file type",
                "The server does not accept this type of file.",
                "Convert the file to a supported format and try again.",
            ),
            RawFailure::Http { status, body } if (400..500).contains(status) => classified(
                ErrorKind::Permanent,
                "Upload rejected",
                format!("The server rejected the request (HTTP {status}): {body}"),
                "Check the file name and destination, then try again.",
            ),
            other => classified(
                ErrorKind::Permanent,
                "Upload failed",
                format!("The upload could not be completed: {other}"),
                "Try again later or contact support if the problem persists.",
            ),
        }
    }
}

/// The prompt offered for a name conflict, in display order.
pub fn conflict_options() -> Vec<PromptOption> {
    vec![
        PromptOption::new("Overwrite", "overwrite", "Replace the existing file"),
        PromptOption::new("Rename", "rename", "Keep both files under a new name"),
        PromptOption::new("Skip", "skip", "Leave the existing file and drop this upload"),
    ]
}

fn classified(
    kind: ErrorKind,
    title: impl Into<String>,
    message: impl Into<String>,
    suggestion: impl Into<String>,
) -> ClassifiedError {
    let recovery_action = match kind {
        ErrorKind::Transient => RecoveryAction::Retry,
        ErrorKind::NameConflict => RecoveryAction::Prompt {
            options: conflict_options(),
        },
        ErrorKind::Permanent => RecoveryAction::None,
    };
    ClassifiedError {
        kind,
        title: title.into(),
        message: message.into(),
        suggestion: suggestion.into(),
        recovery_action,
    }
}

fn mentions_conflict(text: &str) -> bool {
    text.to_ascii_lowercase().contains("already exists")
}

fn mentions_timeout(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("timed out") || text.contains("timeout") || text.contains("connection reset")
}

/// Formats a byte count with binary units, e.g. `100 MB` or `1.5 KB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else if value.fract() == 0.0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
