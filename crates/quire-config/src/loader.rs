//! Loading configuration from strings and files.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::{ConfigError, ConfigResult, QuireConfig};

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (`.toml`)
    Toml,
    /// YAML (`.yaml`, `.yml`)
    Yaml,
    /// JSON (`.json`)
    Json,
}

impl ConfigFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse and validate TOML.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> ConfigResult<QuireConfig> {
        let config: QuireConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "toml",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(content: &str) -> ConfigResult<QuireConfig> {
        let config: QuireConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                format: "yaml",
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON.
    pub fn from_json_str(content: &str) -> ConfigResult<QuireConfig> {
        let config: QuireConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse {
                format: "json",
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse content in an explicit format.
    pub fn from_str_as(content: &str, format: ConfigFormat) -> ConfigResult<QuireConfig> {
        match format {
            #[cfg(feature = "toml")]
            ConfigFormat::Toml => Self::from_toml_str(content),
            #[cfg(feature = "yaml")]
            ConfigFormat::Yaml => Self::from_yaml_str(content),
            ConfigFormat::Json => Self::from_json_str(content),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::UnsupportedFormat(format!(
                "{:?} (feature disabled)",
                other
            ))),
        }
    }

    /// Read a config file; the format is chosen from its extension.
    pub async fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<QuireConfig> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let config = Self::from_str_as(&content, format)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load a config file if it exists, otherwise fall back to defaults.
    pub async fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<QuireConfig> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!("No config at {}, using defaults", path.display());
            return Ok(QuireConfig::default());
        }
        Self::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }
}
