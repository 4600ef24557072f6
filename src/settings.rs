//! Operator settings for one identity server
//!
//! Settings are TOML. Every section is optional and falls back to its
//! defaults; only `[server] id` is normally set by hand.
//!
//! Device configs and thresholds are NOT operator settings. They live on the
//! identity's data chain and change only through a committed voting round.

use crate::identity::ServerId;
use crate::ledger::ChainParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default wait for propagation acknowledgements, in milliseconds
const DEFAULT_PROPAGATION_TIMEOUT_MS: u64 = 1000;

const DEFAULT_SERVER_ID: &str = "localhost";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write settings file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Identity server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceSettings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Chain shape handed to the ledger at genesis
    #[serde(default)]
    pub ledger: ChainParams,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This server's id as it appears in rosters
    #[serde(default = "default_server_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// How long a broadcast waits for each roster member
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_server_id() -> String {
    DEFAULT_SERVER_ID.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_PROPAGATION_TIMEOUT_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: default_server_id(),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_PROPAGATION_TIMEOUT_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl PropagationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServiceSettings {
    /// Default settings for the given server id
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: ServerConfig { id: server.into() },
            ..Self::default()
        }
    }

    pub fn server_id(&self) -> ServerId {
        ServerId::new(self.server.id.clone())
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let settings: ServiceSettings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Save settings to a TOML file, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, contents).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.id.trim().is_empty() {
            return Err(SettingsError::Invalid("server id must not be empty".into()));
        }
        if self.propagation.timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "propagation timeout must be positive".into(),
            ));
        }
        if self.ledger.base_height < 2 || self.ledger.max_height == 0 {
            return Err(SettingsError::Invalid(format!(
                "chain params out of range: base_height={} max_height={}",
                self.ledger.base_height, self.ledger.max_height
            )));
        }
        Ok(())
    }
}
