//! TOML-based configuration persistence for the viewer.
//!
//! Reads and writes [`ViewerConfig`] at the platform-appropriate path:
//! - Windows:  `%APPDATA%\SOSLink\viewer.toml`
//! - Linux:    `~/.config/sos-link/viewer.toml`
//! - macOS:    `~/Library/Application Support/SOSLink/viewer.toml`
//!
//! Every field has a serde default, so a missing file or a file naming only
//! a few values both work.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sos_core::protocol::{DEFAULT_DISCOVERY_PORT, SERVICE_NAME, SERVICE_TYPE};
use sos_net::{BrowserConfig, ServiceIdentity, SessionConfig};
use thiserror::Error;

use crate::application::alert_feed::DEFAULT_MAX_ALERTS;

const CONFIG_FILE_NAME: &str = "viewer.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level viewer configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewerConfig {
    #[serde(default)]
    pub viewer: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Alerts kept in memory before the oldest are dropped.
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
}

/// Discovery and stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// UDP port beacons answer queries on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Where discovery queries are sent.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    #[serde(default = "default_query_interval_ms")]
    pub query_interval_ms: u64,
    /// Largest alert frame accepted, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_alerts() -> usize {
    DEFAULT_MAX_ALERTS
}
fn default_service_type() -> String {
    SERVICE_TYPE.to_string()
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_query_interval_ms() -> u64 {
    3_000
}
fn default_max_frame_len() -> usize {
    SessionConfig::default().max_frame_len
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_alerts: default_max_alerts(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            query_interval_ms: default_query_interval_ms(),
            max_frame_len: default_max_frame_len(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    /// The browser settings these values describe.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparsable broadcast
    /// address or a zero query interval.
    pub fn browser_config(&self) -> Result<BrowserConfig, ConfigError> {
        let query_address: IpAddr = self.broadcast_address.parse().map_err(
            |e: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "network.broadcast_address",
                reason: e.to_string(),
            },
        )?;
        if self.query_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.query_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(BrowserConfig {
            identity: ServiceIdentity {
                service_type: self.service_type.clone(),
                instance_name: SERVICE_NAME.to_string(),
            },
            discovery_port: self.discovery_port,
            query_address,
            query_interval: Duration::from_millis(self.query_interval_ms),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_frame_len: self.max_frame_len,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..SessionConfig::default()
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from the platform path, or defaults if it does not exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ViewerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ViewerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ViewerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform path.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &ViewerConfig) -> Result<(), ConfigError> {
    save_config_to(&config_file_path()?, config)
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &ViewerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SOSLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("sos-link"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("SOSLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
