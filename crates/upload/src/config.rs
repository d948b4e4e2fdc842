//! Engine configuration stored as JSON.
//!
//! Default location: `~/.config/docdrop/config.json`. Missing keys fall back
//! to their defaults, so an empty object is a valid file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{DEFAULT_MAX_FILE_SIZE, ErrorClassifier};
use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// Longest backoff a config file can ask for: one day.
const MAX_CONFIGURED_DELAY_SECS: f64 = 86_400.0;

/// Tunables for an [`UploadManager`](crate::UploadManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Total automatic attempts per job, first one included.
    pub max_attempts: u32,
    pub initial_retry_delay_secs: f64,
    pub backoff_factor: f64,
    pub max_retry_delay_secs: f64,
    /// `None` runs every job at once.
    pub max_concurrent_uploads: Option<usize>,
    /// Size above which a refusal is permanent.
    pub max_file_size_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay_secs: 2.0,
            backoff_factor: 2.0,
            max_retry_delay_secs: 30.0,
            max_concurrent_uploads: None,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Writes the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Builds the retry policy, sanitising out-of-range values.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: secs(self.initial_retry_delay_secs),
            backoff_factor: if self.backoff_factor.is_finite() {
                self.backoff_factor.max(1.0)
            } else {
                1.0
            },
            max_delay: secs(self.max_retry_delay_secs),
        }
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.max_file_size_bytes)
    }

    /// Concurrency cap, never zero.
    pub fn concurrency_limit(&self) -> Option<usize> {
        self.max_concurrent_uploads.map(|n| n.max(1))
    }
}

/// Negative and NaN values disable the delay; anything larger than a day,
/// infinity included, is capped at a day.
fn secs(value: f64) -> Duration {
    if value > 0.0 {
        Duration::from_secs_f64(value.min(MAX_CONFIGURED_DELAY_SECS))
    } else {
        Duration::ZERO
    }
}

/// Returns `~/.config/docdrop/config.json` (`%APPDATA%` on Windows).
pub fn default_config_path() -> PathBuf {
    config_base_dir().join("docdrop").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxAttempts": 5, "maxConcurrentUploads": 2}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_concurrent_uploads, Some(2));
        assert_eq!(config.backoff_factor, 2.0);
        assert_eq!(config.max_file_size_bytes, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(UploadError::Json(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = EngineConfig {
            max_attempts: 4,
            max_concurrent_uploads: Some(3),
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"maxConcurrentUploads\": 3"));
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn policy_from_defaults() {
        let policy = EngineConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn out_of_range_values_are_sanitised() {
        let config = EngineConfig {
            max_attempts: 0,
            initial_retry_delay_secs: -1.0,
            backoff_factor: f64::NAN,
            max_retry_delay_secs: f64::INFINITY,
            max_concurrent_uploads: Some(0),
            ..EngineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_delay, Duration::ZERO);
        assert_eq!(policy.backoff_factor, 1.0);
        assert_eq!(policy.max_delay, Duration::from_secs(86_400));
        assert_eq!(config.concurrency_limit(), Some(1));
    }

    #[test]
    fn unbounded_delay_cap_keeps_backoff() {
        let config = EngineConfig {
            max_retry_delay_secs: f64::INFINITY,
            ..EngineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));

        let config = EngineConfig {
            max_retry_delay_secs: f64::NAN,
            ..EngineConfig::default()
        };
        assert_eq!(config.retry_policy().max_delay, Duration::ZERO);
    }

    #[test]
    fn classifier_uses_configured_ceiling() {
        let config = EngineConfig {
            max_file_size_bytes: 1024,
            ..EngineConfig::default()
        };
        assert_eq!(config.classifier().max_file_size(), 1024);
    }
}
