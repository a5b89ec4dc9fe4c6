//! Relay configuration file
//!
//! Holds the initial session settings and logging preferences, stored as
//! pretty JSON under the platform config directory. Every field has a
//! default, so a missing file or a partial one is always usable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{APP_DIR_NAME, CONFIG_FILE_NAME};
use crate::logging::{LogFormat, LoggingError, init_logging};
use crate::settings::Settings;

/// Errors reading or writing the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Well-formed file with an out-of-range setting
    #[error("config setting {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Logging preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// 0=error, 1=warn, 2=info, 3=debug, 4+=trace
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,

    #[serde(default)]
    pub format: LogFormat,

    /// Append to this file instead of writing to stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: default_verbosity(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber these preferences describe
    ///
    /// # Errors
    ///
    /// See [`init_logging`].
    pub fn init(&self) -> Result<(), LoggingError> {
        init_logging(self.verbosity, self.file.as_deref(), self.format)
    }
}

fn default_verbosity() -> u8 {
    2
}

/// Contents of `relay.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Platform config file path (`<config dir>/mte-relay/relay.json`)
    ///
    /// Returns None if the config directory cannot be determined.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the platform path, falling back to defaults when there is
    /// no config directory or no file
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::load_from`].
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is not valid JSON,
    /// or holds an out-of-range setting.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path` as pretty JSON, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the directory or file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.settings
            .check()
            .map_err(|(field, e)| ConfigError::Invalid {
                field,
                reason: e.to_string(),
            })
    }
}
