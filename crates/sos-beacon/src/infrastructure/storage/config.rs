//! TOML-based configuration persistence for the beacon.
//!
//! Reads and writes [`BeaconConfig`] at the platform-appropriate path:
//! - Windows:  `%APPDATA%\SOSLink\beacon.toml`
//! - Linux:    `~/.config/sos-link/beacon.toml`
//! - macOS:    `~/Library/Application Support/SOSLink/beacon.toml`
//!
//! Example:
//!
//! ```toml
//! [beacon]
//! log_level = "debug"
//! continuous = true
//!
//! [network]
//! discovery_port = 24870
//!
//! [evaluator]
//! window_ms = 8000
//!
//! [evaluator.scoring]
//! priority_labels = ["fire_alarm", "scream"]
//!
//! [classifier]
//! script = "/etc/sos-link/drill.toml"
//! ```
//!
//! Every table and field is optional.  Missing values take the defaults
//! below, so the beacon runs on first start with no file at all.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sos_core::protocol::{DEFAULT_DISCOVERY_PORT, SERVICE_NAME, SERVICE_TYPE};
use sos_core::{EvaluatorConfig, Location, UserProfile};
use sos_net::{AdvertiserConfig, ServiceIdentity, SessionConfig};
use thiserror::Error;

use crate::infrastructure::classifier::DEFAULT_CONFIDENCE_THRESHOLD;

const CONFIG_FILE_NAME: &str = "beacon.toml";

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

    /// A value parsed but is not usable.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level beacon configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BeaconConfig {
    #[serde(default)]
    pub beacon: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Shared with responders in every alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    /// Fixed position of a stationary beacon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// General beacon behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Start a new listening session after each one ends.
    #[serde(default)]
    pub continuous: bool,
}

/// Discovery and stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// UDP port discovery queries arrive on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// IP address to bind all sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port for alert streams; 0 picks an ephemeral port.
    #[serde(default)]
    pub stream_port: u16,
    /// Largest frame accepted from a viewer, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// Classifier adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// Results below this confidence never reach the evaluator.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Classification script replayed by the headless beacon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_service_type() -> String {
    SERVICE_TYPE.to_string()
}
fn default_instance_name() -> String {
    SERVICE_NAME.to_string()
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_max_frame_len() -> usize {
    SessionConfig::default().max_frame_len
}
fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            continuous: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            instance_name: default_instance_name(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            stream_port: 0,
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            script: None,
        }
    }
}

impl NetworkConfig {
    /// The advertiser settings these values describe.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `bind_address` is not an IP.
    pub fn advertiser_config(&self) -> Result<AdvertiserConfig, ConfigError> {
        let bind_address: IpAddr =
            self.bind_address
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                    field: "network.bind_address",
                    reason: e.to_string(),
                })?;
        Ok(AdvertiserConfig {
            identity: ServiceIdentity {
                service_type: self.service_type.clone(),
                instance_name: self.instance_name.clone(),
            },
            discovery_port: self.discovery_port,
            bind_address,
            stream_port: self.stream_port,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_frame_len: self.max_frame_len,
            ..SessionConfig::default()
        }
    }
}

impl BeaconConfig {
    /// Checks the values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.advertiser_config()?;
        self.evaluator
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                field: "evaluator",
                reason: e.to_string(),
            })?;
        if !(0.0..=1.0).contains(&self.classifier.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "classifier.confidence_threshold",
                reason: format!("{} outside [0, 1]", self.classifier.confidence_threshold),
            });
        }
        Ok(())
    }

    /// How long one listening session lasts at most.
    pub fn max_session_length(&self) -> Duration {
        self.evaluator.grace() + self.evaluator.window()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the config file.
///
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
pub fn load_config() -> Result<BeaconConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<BeaconConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BeaconConfig::default()),
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
pub fn save_config(config: &BeaconConfig) -> Result<(), ConfigError> {
    save_config_to(&config_file_path()?, config)
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &BeaconConfig) -> Result<(), ConfigError> {
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

// ── Tests ─────────────────────────────────────────────────────────────────────
