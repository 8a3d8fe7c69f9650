//! Configuration schema for the Quire engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file {path}: {message}")]
    Io {
        /// Path that was being read
        path: String,
        /// Underlying error message
        message: String,
    },

    /// The content could not be parsed in the given format
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        /// Format name (toml, yaml, json)
        format: &'static str,
        /// Parser error message
        message: String,
    },

    /// The file extension does not map to a supported format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// The configuration parsed but violates a constraint
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    /// Autosave scheduling
    pub autosave: AutosaveConfig,
    /// Event bus behaviour
    pub events: EventConfig,
    /// Logging setup
    pub logging: LoggingConfig,
}

impl QuireConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        self.autosave.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Autosave configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Whether the background autosave task runs at all
    pub enabled: bool,
    /// Tick interval in milliseconds; 0 disables autosave
    pub interval_ms: u64,
    /// Minimum quiet time after the last edit before a node is eligible.
    ///
    /// Ticks run every `interval_ms`, so an edit reaches storage between
    /// `debounce_ms` and `debounce_ms + interval_ms` after it was made.
    pub debounce_ms: u64,
    /// Consecutive failed attempts before a node is marked failed
    pub max_retries: u32,
}

impl AutosaveConfig {
    /// Default tick interval
    pub const DEFAULT_INTERVAL_MS: u64 = 30_000;
    /// Default debounce window
    pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
    /// Default retry budget
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Interval the scheduler should use, or `None` when autosave is off.
    pub fn effective_interval(&self) -> Option<Duration> {
        if self.enabled && self.interval_ms > 0 {
            Some(Duration::from_millis(self.interval_ms))
        } else {
            None
        }
    }

    /// Debounce window as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "autosave.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: Self::DEFAULT_INTERVAL_MS,
            debounce_ms: Self::DEFAULT_DEBOUNCE_MS,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Log every emitted event at debug level
    pub log_events: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { log_events: true }
    }
}

/// Output style for the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default single-line format
    #[default]
    Full,
    /// Abbreviated single-line format
    Compact,
    /// Multi-line human-readable format
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    fn validate(&self) -> ConfigResult<()> {
        let level = self.level.to_ascii_lowercase();
        if !Self::LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got '{}'",
                Self::LEVELS,
                self.level
            )));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
        }
    }
}
