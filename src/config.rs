//! Configuration management for onionserve
//!
//! Handles loading configuration from ~/.config/onionserve/config.toml and
//! merging it with command-line overrides.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::onion::{
    BootstrapConfig, DEFAULT_AUTH_COOKIE, DEFAULT_CONTROL_SOCKET, DEFAULT_VIRTUAL_PORT,
};

/// File name inside the per-user config directory
const CONFIG_FILE: &str = "config.toml";

/// Per-user config directory name
const APP_NAME: &str = "onionserve";

/// Errors while locating or reading the config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Invalid config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("No per-user config directory on this platform")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings read from the config file.
///
/// Every field is optional; unset fields fall back to the Tor defaults.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Path of Tor's control socket
    #[serde(default)]
    pub control_socket: Option<PathBuf>,

    /// Path of Tor's control authentication cookie
    #[serde(default)]
    pub auth_cookie: Option<PathBuf>,

    /// Port published on the onion address
    #[serde(default)]
    pub virtual_port: Option<u16>,

    /// File to write debug logs to
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Values given on the command line, which take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub control_socket: Option<PathBuf>,
    pub auth_cookie: Option<PathBuf>,
    pub virtual_port: Option<u16>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// ~/.config/onionserve/config.toml on Linux
    pub fn config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load the per-user config file, if there is one
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load `path`; a missing file is an empty configuration
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply command-line overrides on top of this configuration
    pub fn merged(mut self, overrides: Overrides) -> Self {
        if overrides.control_socket.is_some() {
            self.control_socket = overrides.control_socket;
        }
        if overrides.auth_cookie.is_some() {
            self.auth_cookie = overrides.auth_cookie;
        }
        if overrides.virtual_port.is_some() {
            self.virtual_port = overrides.virtual_port;
        }
        if overrides.log_file.is_some() {
            self.log_file = overrides.log_file;
        }
        self
    }

    /// Effective control socket path (configured or default)
    pub fn effective_control_socket(&self) -> PathBuf {
        self.control_socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTROL_SOCKET))
    }

    /// Effective bring-up settings (configured or default)
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            auth_cookie: self
                .auth_cookie
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUTH_COOKIE)),
            virtual_port: self.virtual_port.unwrap_or(DEFAULT_VIRTUAL_PORT),
        }
    }
}

/// Render the configuration for `--show-config`
pub fn format_config(config: &Config) -> String {
    let mut lines = Vec::new();

    lines.push("Effective configuration:".to_string());
    lines.push(String::new());

    match config.control_socket {
        Some(ref path) => lines.push(format!("  control_socket = \"{}\"", path.display())),
        None => lines.push(format!(
            "  control_socket = (not set, using {})",
            DEFAULT_CONTROL_SOCKET
        )),
    }

    match config.auth_cookie {
        Some(ref path) => lines.push(format!("  auth_cookie = \"{}\"", path.display())),
        None => lines.push(format!(
            "  auth_cookie = (not set, using {})",
            DEFAULT_AUTH_COOKIE
        )),
    }

    match config.virtual_port {
        Some(port) => lines.push(format!("  virtual_port = {}", port)),
        None => lines.push(format!(
            "  virtual_port = (not set, using {})",
            DEFAULT_VIRTUAL_PORT
        )),
    }

    match config.log_file {
        Some(ref path) => lines.push(format!("  log_file = \"{}\"", path.display())),
        None => lines.push("  log_file = (not set)".to_string()),
    }

    lines.join("\n")
}
