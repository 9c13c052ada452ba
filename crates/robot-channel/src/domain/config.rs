//! TOML-based configuration for the robot channel client.
//!
//! The file is optional.  Every field carries a serde default, so an empty
//! file, a file written by an older version, or no file at all all produce a
//! working configuration.  Command-line flags are applied on top afterwards.
//!
//! Default location:
//! - Windows:  `%APPDATA%\RobotChannel\config.toml`
//! - Linux:    `~/.config/robot-channel/config.toml`
//! - macOS:    `~/Library/Application Support/RobotChannel/config.toml`
//!
//! Example:
//!
//! ```toml
//! robot_family = "mini"
//! port = 8800
//! connect_timeout_secs = 15
//! request_timeout_secs = 10
//! scan_timeout_secs = 10
//! log_level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use robot_core::{RobotFamily, DEFAULT_CHANNEL_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Client settings stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    /// Product family whose service type discovery browses for.
    #[serde(default)]
    pub robot_family: RobotFamily,
    /// Command channel port the `send` command dials when `--port` is not
    /// given.  Discovered devices use their advertised port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long `connect` waits for the WebSocket handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long a correlated request waits for its reply.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long a discovery scan runs.
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    DEFAULT_CHANNEL_PORT
}
fn default_connect_timeout_secs() -> u64 {
    15
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_scan_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            robot_family: RobotFamily::default(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            scan_timeout_secs: default_scan_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or a field has
    /// the wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the configuration at `path`, returning the defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Config location ───────────────────────────────────────────────────────────

/// Resolves the platform-appropriate config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory cannot
/// be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RobotChannel"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("robot-channel"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RobotChannel")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
