use crate::TrackerError;

/// Validates the display name of a file submitted for upload.
///
/// The name becomes a single entry inside the destination container, so
/// it must be one plain path component.
///
/// Rejects:
/// - Empty or whitespace-only names
/// - Path separators (`/` or `\`)
/// - The special entries `.` and `..`
/// - Control characters
pub fn validate_file_name(name: &str) -> Result<(), TrackerError> {
    if name.trim().is_empty() {
        return Err(TrackerError::InvalidInput("file name is empty".into()));
    }

    if name.contains(['/', '\\']) {
        return Err(TrackerError::InvalidInput(format!(
            "file name must not contain path separators: {name}"
        )));
    }

    if name == "." || name == ".." {
        return Err(TrackerError::InvalidInput(format!(
            "reserved file name: {name}"
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(TrackerError::InvalidInput(
            "file name contains control characters".into(),
        ));
    }

    Ok(())
}
