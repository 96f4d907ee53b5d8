//! Configuration management for subway
//!
//! Handles loading and saving the JSON run configuration (`subway.json` in the
//! working directory by default) and applying command-line overrides on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "subway.json";

/// Default directory served when none is configured
pub const DEFAULT_ROOT: &str = "./";

/// Default port for the content server
pub const DEFAULT_PORT: u16 = 8864;

/// Default tor executable, resolved through PATH
pub const DEFAULT_TOR_PATH: &str = "tor";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] serde_json::Error),

    #[error("Failed to write config file {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid port 0: the hidden service needs a fixed local port to map to")]
    InvalidPort,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Run configuration
///
/// Constructed once per run (defaults, then file, then CLI overrides) and
/// handed to the lifecycle coordinator by value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory served by the content server
    pub root: PathBuf,

    /// Port the content server listens on
    pub port: u16,

    /// Path to the tor executable
    #[serde(rename = "torPath", alias = "daemonPath")]
    pub tor_path: PathBuf,

    /// Forward hidden service traffic here instead of serving `root`
    /// (e.g. "localhost:8080"). Empty disables forwarding.
    #[serde(rename = "portForwarding")]
    pub port_forwarding: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            port: DEFAULT_PORT,
            tor_path: PathBuf::from(DEFAULT_TOR_PATH),
            port_forwarding: String::new(),
        }
    }
}

/// Individual field overrides supplied on the command line
///
/// Only fields that were explicitly given are `Some`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub port: Option<u16>,
    pub tor_path: Option<PathBuf>,
    pub port_forwarding: Option<String>,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Returns the default config if the file doesn't exist. Fields missing
    /// from the file keep their default values.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration, falling back to defaults on any error
    ///
    /// Used for the implicit `subway.json`; an unreadable default file is
    /// reported and ignored rather than aborting the run.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable default config");
                Self::default()
            }
        }
    }

    /// Save configuration to a JSON file, pretty-printed
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let mut contents = serde_json::to_string_pretty(self)?;
        contents.push('\n');
        fs::write(path, contents).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply explicitly supplied overrides on top of this configuration
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref root) = overrides.root {
            self.root = root.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(ref tor_path) = overrides.tor_path {
            self.tor_path = tor_path.clone();
        }
        if let Some(ref forward) = overrides.port_forwarding {
            self.port_forwarding = forward.clone();
        }
    }

    /// Reject settings a run cannot honour.
    ///
    /// Port 0 would bind an ephemeral port that the torrc mapping cannot
    /// name. It is allowed when forwarding, where the port is unused.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 && self.forward_target().is_none() {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }

    /// The forwarding target, if forwarding mode is enabled
    pub fn forward_target(&self) -> Option<&str> {
        let target = self.port_forwarding.trim();
        if target.is_empty() {
            None
        } else {
            Some(target)
        }
    }
}

/// Write the default configuration to `path`
pub fn generate_default_config(path: &Path) -> ConfigResult<()> {
    Config::default().save(path)
}

/// Format the configuration for display
pub fn format_config(config: &Config) -> String {
    let mut lines = Vec::new();

    lines.push("Current configuration:".to_string());
    lines.push(String::new());
    lines.push(format!("  root = \"{}\"", config.root.display()));
    lines.push(format!("  port = {}", config.port));
    lines.push(format!("  torPath = \"{}\"", config.tor_path.display()));

    match config.forward_target() {
        Some(target) => lines.push(format!("  portForwarding = \"{}\"", target)),
        None => lines.push("  portForwarding = (not set, serving root)".to_string()),
    }

    lines.join("\n")
}
