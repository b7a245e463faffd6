//! TOML-based configuration persistence for the peer application.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate config file:
//! - Windows:  `%APPDATA%\UtttOverLan\config.toml`
//! - Linux:    `~/.config/uttt-over-lan/config.toml`
//! - macOS:    `~/Library/Application Support/UtttOverLan/config.toml`
//!
//! Every field carries a serde default so the app works on first run
//! (before a config file exists) and when upgrading from an older file
//! that is missing newer fields.

use std::path::{Path, PathBuf};

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

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub peer: PeerSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

/// General peer behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSettings {
    /// Display name announced on the network.  Defaults to the hostname or
    /// `"player"` when the hostname cannot be read.
    #[serde(default = "default_identity")]
    pub identity: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Network port and address settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// UDP port for discovery broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// IP address to bind the discovery and stream listeners to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination address for announcement broadcasts.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
}

/// Protocol timing knobs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSettings {
    /// Interval between announcement broadcasts while searching.
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,
    /// Window after which an unrefreshed pending request is evicted.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Bound on the outbound connect attempt during accept.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_identity() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "player".to_string())
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_discovery_port() -> u16 {
    24820
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_announce_interval() -> u64 {
    1
}
fn default_stale_after() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    5
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            announce_interval_secs: default_announce_interval(),
            stale_after_secs: default_stale_after(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config
/// base directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory
/// cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`AppConfig`] from `path`, returning `AppConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Loads [`AppConfig`] from the platform config path.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
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
    })?;
    Ok(())
}

/// Persists `config` to the platform config path.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("UtttOverLan"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("uttt-over-lan"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("UtttOverLan")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_network_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.network.discovery_port, 24820);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.network.broadcast_address, "255.255.255.255");
    }

    #[test]
    fn test_default_config_has_expected_timing_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.timing.announce_interval_secs, 1);
        assert_eq!(cfg.timing.stale_after_secs, 30);
        assert_eq!(cfg.timing.connect_timeout_secs, 5);
    }

    #[test]
    fn test_default_identity_is_not_empty() {
        let cfg = AppConfig::default();
        assert!(!cfg.peer.identity.is_empty());
    }

    #[test]
    fn test_toml_round_trip_preserves_config() {
        let mut cfg = AppConfig::default();
        cfg.peer.identity = "alice".to_string();
        cfg.network.discovery_port = 30000;

        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let parsed: AppConfig = toml::from_str("[peer]\nidentity = \"alice\"\n").unwrap();
        assert_eq!(parsed.peer.identity, "alice");
        assert_eq!(parsed.peer.log_level, "info");
        assert_eq!(parsed.network.discovery_port, 24820);
        assert_eq!(parsed.timing.stale_after_secs, 30);
    }

    #[test]
    fn test_empty_file_parses_to_defaults() {
        let parsed: AppConfig = toml::from_str("").unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let dir = std::env::temp_dir().join("uttt-config-test-parse");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "peer = not toml").unwrap();

        let result = load_config_from(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("uttt-config-test-missing/config.toml");
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = std::env::temp_dir().join("uttt-config-test-save");
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.peer.identity = "carol".to_string();

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, cfg);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
