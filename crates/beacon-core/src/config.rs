//! Configuration for Beacon.
//!
//! Every section is optional in the YAML file; missing fields fall back to the
//! defaults below.
//!
//! ```yaml
//! alerts:
//!   capacity: 10
//!   dedup_window_ms: 3000
//! retry:
//!   max_attempts: 5
//!   jitter: true
//! reporting:
//!   max_history: 50
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};

/// Top-level Beacon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Alert queue settings
    pub alerts: AlertConfig,

    /// Retry engine defaults
    pub retry: RetryConfig,

    /// Error reporting settings
    pub reporting: ReportingConfig,
}

/// Alert queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Maximum number of live alerts
    pub capacity: usize,

    /// Window during which an identical (message, kind) alert is dropped
    pub dedup_window_ms: u64,

    /// Auto-dismiss delay for success, warning and info alerts
    pub default_duration_ms: u64,

    /// Auto-dismiss delay for error alerts (0 = persistent)
    pub error_duration_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            dedup_window_ms: 3000,
            default_duration_ms: 5000,
            error_duration_ms: 0,
        }
    }
}

/// Retry engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per retry sequence (coerced to at least 1)
    pub max_attempts: u32,

    /// Base delay between attempts
    pub base_delay_ms: u64,

    /// Upper bound on any single delay
    pub max_delay_ms: u64,

    /// Double the delay after each failed attempt
    pub exponential_backoff: bool,

    /// Add up to 10% random delay
    pub jitter: bool,

    /// Per-attempt deadline (none when absent)
    pub timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            exponential_backoff: true,
            jitter: false,
            timeout_ms: None,
        }
    }
}

/// Error reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Reports kept per tracker
    pub max_history: usize,

    /// Emit a log event for every report
    pub console_logging: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            console_logging: true,
        }
    }
}

impl BeaconConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BeaconError::config_not_found_with_source(path, e)
            } else {
                BeaconError::io("reading config", path, e)
            }
        })?;

        Self::from_yaml(&contents, path)
    }

    /// Load configuration, falling back to defaults when the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(BeaconError::ConfigNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "config not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Parse configuration from YAML text. `origin` is used in error messages.
    pub fn from_yaml(contents: &str, origin: &Path) -> Result<Self> {
        // An empty file deserializes to `null`, which means "all defaults".
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_yaml::from_str(contents).map_err(|e| BeaconError::ConfigInvalid {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.alerts.capacity == 0 {
            return Err(BeaconError::ConfigValidation {
                message: "alerts.capacity must be at least 1".into(),
            });
        }
        if self.reporting.max_history == 0 {
            return Err(BeaconError::ConfigValidation {
                message: "reporting.max_history must be at least 1".into(),
            });
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(BeaconError::ConfigValidation {
                message: format!(
                    "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                    self.retry.max_delay_ms, self.retry.base_delay_ms
                ),
            });
        }
        Ok(())
    }
}

/// Get the default configuration file path.
///
/// Returns `~/.beacon/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| BeaconError::Internal {
        message: "home directory could not be determined".into(),
    })?;
    Ok(home.join(".beacon").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BeaconConfig::default();
        assert_eq!(config.alerts.capacity, 10);
        assert_eq!(config.alerts.dedup_window_ms, 3000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert!(config.retry.exponential_backoff);
        assert!(!config.retry.jitter);
        assert_eq!(config.reporting.max_history, 50);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "retry:\n  max_attempts: 5\n  jitter: true\n";
        let config = BeaconConfig::from_yaml(yaml, Path::new("inline")).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.jitter);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.alerts, AlertConfig::default());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = BeaconConfig::from_yaml("  \n", Path::new("inline")).unwrap();
        assert_eq!(config, BeaconConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = BeaconConfig::from_yaml("alerts: [1, 2", Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, BeaconError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err =
            BeaconConfig::from_yaml("alerts:\n  capacity: 0\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, BeaconError::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alerts:\n  capacity: 4\nreporting:\n  console_logging: false").unwrap();

        let config = BeaconConfig::load(file.path()).unwrap();
        assert_eq!(config.alerts.capacity, 4);
        assert!(!config.reporting.console_logging);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = BeaconConfig::load_or_default(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, BeaconConfig::default());
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = BeaconConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, BeaconError::ConfigNotFound { .. }));
    }
}
