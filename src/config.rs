//! Task configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`.apptask.toml`)
//! 2. Environment variables (with `APPTASK_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [tasks]
//! visibility_threshold_ms = 500
//! show_exceptions = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{CONFIG_FILE, DEFAULT_VISIBILITY_THRESHOLD_MS};

/// Defaults applied to every task unit created by a
/// [`TaskFactory`](crate::TaskFactory).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use apptask::TaskConfig;
///
/// let config = TaskConfig::default();
/// assert_eq!(config.visibility_threshold(), Duration::from_millis(500));
/// assert!(config.show_exceptions);
///
/// let config = TaskConfig::default()
///     .with_visibility_threshold(Duration::from_secs(1))
///     .with_show_exceptions(false);
/// assert_eq!(config.visibility_threshold_ms, 1000);
/// assert!(!config.show_exceptions);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// How long a unit must run before it is added to its host's list.
    pub visibility_threshold_ms: u64,

    /// Whether failures are forwarded to the error sink unless a unit
    /// replaces the default exception handler.
    pub show_exceptions: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            visibility_threshold_ms: DEFAULT_VISIBILITY_THRESHOLD_MS,
            show_exceptions: true,
        }
    }
}

impl TaskConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    ///
    /// A missing `[tasks]` table yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            tasks: TaskConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(full.tasks)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("APPTASK_VISIBILITY_THRESHOLD_MS") {
            match v.parse() {
                Ok(ms) => self.visibility_threshold_ms = ms,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid APPTASK_VISIBILITY_THRESHOLD_MS"),
            }
        }
        if let Some(v) = lookup("APPTASK_SHOW_EXCEPTIONS") {
            match v.parse() {
                Ok(b) => self.show_exceptions = b,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid APPTASK_SHOW_EXCEPTIONS"),
            }
        }
    }

    /// The visibility threshold as a [`Duration`].
    pub fn visibility_threshold(&self) -> Duration {
        Duration::from_millis(self.visibility_threshold_ms)
    }

    /// Sets the visibility threshold.
    pub fn with_visibility_threshold(mut self, threshold: Duration) -> Self {
        self.visibility_threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets whether failures are shown through the error sink by default.
    pub fn with_show_exceptions(mut self, show: bool) -> Self {
        self.show_exceptions = show;
        self
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// The path that was read.
        path: String,
        /// The underlying I/O error message.
        error: String,
    },

    /// The configuration content is not valid TOML for [`TaskConfig`].
    #[error("failed to parse config: {0}")]
    Parse(String),
}
