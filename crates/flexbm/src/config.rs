//! Runtime configuration file support.
//!
//! Loads and validates the switch runtime settings from a TOML file. Every
//! field has a default, so a missing file or a missing section is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Dataplane worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataplaneConfig {
    /// Number of packet worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-worker ingress queue depth
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Number of execution contexts
    #[serde(default = "default_contexts")]
    pub contexts: usize,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub dataplane: DataplaneConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub switch: SwitchConfig,
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    1024
}

fn default_level() -> String {
    "info".to_string()
}

fn default_contexts() -> usize {
    1
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            contexts: default_contexts(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.dataplane.workers == 0 {
            return Err(ConfigError::Invalid("workers must be > 0".to_string()));
        }
        if self.dataplane.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be > 0".to_string()));
        }
        if self.switch.contexts == 0 {
            return Err(ConfigError::Invalid("contexts must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.dataplane.workers, 4);
        assert_eq!(config.dataplane.queue_depth, 1024);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.switch.contexts, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [dataplane]
            workers = 2

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.dataplane.workers, 2);
        assert_eq!(config.dataplane.queue_depth, 1024);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = RuntimeConfig::default();
        config.dataplane.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RuntimeConfig::default();
        config.switch.contexts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(
            RuntimeConfig::load_or_default(&missing).unwrap(),
            RuntimeConfig::default()
        );

        let path = dir.path().join("flexbm.toml");
        let mut config = RuntimeConfig::default();
        config.switch.contexts = 3;
        config.save(&path).unwrap();
        assert_eq!(RuntimeConfig::load_or_default(&path).unwrap(), config);

        fs::write(&path, "[switch]\ncontexts = \"many\"").unwrap();
        assert!(matches!(
            RuntimeConfig::load_or_default(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
