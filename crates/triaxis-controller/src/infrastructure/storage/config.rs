//! TOML-based configuration persistence for the controller application.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\TriAxis\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/triaxis/config.toml` (or `~/.config/triaxis`)
//! - macOS:    `~/Library/Application Support/TriAxis/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [controller]
//! name = "Bench Controller"
//! jog_step = 25
//!
//! [session]
//! connect_timeout_ms = 5000
//!
//! [simulation]
//! enabled = true
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section or a
//! missing key all fall back to the built-in values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use triaxis_core::domain::axis::{DEFAULT_SPEED, DEFAULT_TORQUE, MAX_SPEED, MAX_TORQUE};
use uuid::Uuid;

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

    /// A value parsed fine but is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub axes: AxesConfig,
}

/// Identity and manual-control settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Stable id sent in every `Hello`; generated on first run.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Name the controller announces to boards.
    #[serde(default = "default_controller_name")]
    pub name: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Steps moved by one jog press.
    #[serde(default = "default_jog_step")]
    pub jog_step: u32,
}

/// Session lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Upper bound on a single connect attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Keepalive ping interval while connected; `0` disables keepalives.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Capacity of the per-session move queue.
    #[serde(default = "default_move_queue_depth")]
    pub move_queue_depth: usize,
}

/// Local-network transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// UDP port boards listen on for discovery requests.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port used when a device id is a bare IP address.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Destination address for discovery requests.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// How long a scan waits for announcements.
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
}

/// Simulated transports stand in for real boards when enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_delay_ms")]
    pub scan_delay_ms: u64,
    #[serde(default = "default_short_range_connect_ms")]
    pub short_range_connect_ms: u64,
    #[serde(default = "default_local_network_connect_ms")]
    pub local_network_connect_ms: u64,
}

/// Initial motion targets for every axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxesConfig {
    #[serde(default = "default_speed")]
    pub default_speed: u16,
    #[serde(default = "default_torque")]
    pub default_torque: u8,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_controller_name() -> String {
    "TriAxis Controller".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_jog_step() -> u32 {
    10
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_keepalive_interval_ms() -> u64 {
    2_000
}
fn default_move_queue_depth() -> usize {
    64
}
fn default_discovery_port() -> u16 {
    24811
}
fn default_control_port() -> u16 {
    24810
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_scan_window_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_scan_delay_ms() -> u64 {
    1_000
}
fn default_short_range_connect_ms() -> u64 {
    2_000
}
fn default_local_network_connect_ms() -> u64 {
    1_500
}
fn default_speed() -> u16 {
    DEFAULT_SPEED
}
fn default_torque() -> u8 {
    DEFAULT_TORQUE
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: default_controller_name(),
            log_level: default_log_level(),
            jog_step: default_jog_step(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            move_queue_depth: default_move_queue_depth(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            control_port: default_control_port(),
            broadcast_address: default_broadcast_address(),
            scan_window_ms: default_scan_window_ms(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            scan_delay_ms: default_scan_delay_ms(),
            short_range_connect_ms: default_short_range_connect_ms(),
            local_network_connect_ms: default_local_network_connect_ms(),
        }
    }
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            default_speed: default_speed(),
            default_torque: default_torque(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when keepalives are disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }
}

impl NetworkConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }
}

impl AppConfig {
    /// Checks values that deserialize fine but make no sense at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.jog_step == 0 || self.controller.jog_step > i32::MAX as u32 {
            return Err(invalid("controller.jog_step", "must be between 1 and 2147483647"));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(invalid("session.connect_timeout_ms", "must be greater than zero"));
        }
        if self.session.move_queue_depth == 0 {
            return Err(invalid("session.move_queue_depth", "must be greater than zero"));
        }
        if self.axes.default_speed > MAX_SPEED {
            return Err(invalid("axes.default_speed", "must be at most 1000"));
        }
        if self.axes.default_torque > MAX_TORQUE {
            return Err(invalid("axes.default_torque", "must be at most 100"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Same as [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning defaults if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value is out of range.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
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
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TriAxis"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("triaxis"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TriAxis")
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

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("triaxis_test_{}", Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_defaults_follow_manual_control_screen() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.controller.jog_step, 10);
        assert_eq!(cfg.axes.default_speed, 50);
        assert_eq!(cfg.axes.default_torque, 50);
        assert_eq!(cfg.simulation.short_range_connect_ms, 2_000);
        assert_eq!(cfg.simulation.local_network_connect_ms, 1_500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_keepalive_zero_disables_pings() {
        let mut cfg = SessionConfig::default();
        assert_eq!(cfg.keepalive_interval(), Some(Duration::from_millis(2_000)));
        cfg.keepalive_interval_ms = 0;
        assert_eq!(cfg.keepalive_interval(), None);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.network.control_port = 9000;
        cfg.controller.name = "bench".to_string();

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_empty_toml_uses_defaults_and_generates_id() {
        // Act
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");

        // Assert
        assert_eq!(cfg.session.connect_timeout_ms, 5_000);
        assert_eq!(cfg.network.discovery_port, 24811);
        assert!(!cfg.controller.id.is_nil());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str("[network]\ncontrol_port = 9999\n").unwrap();
        assert_eq!(cfg.network.control_port, 9999);
        assert_eq!(cfg.network.scan_window_ms, 1_000);
    }

    #[test]
    fn test_validate_rejects_zero_jog_step() {
        let mut cfg = AppConfig::default();
        cfg.controller.jog_step = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "controller.jog_step",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_axis_defaults() {
        let mut cfg = AppConfig::default();
        cfg.axes.default_torque = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_config_from_missing_file_returns_defaults() {
        let cfg = load_config_from(&temp_config_path()).expect("defaults");
        assert_eq!(cfg.controller.jog_step, 10);
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        // Arrange
        let path = temp_config_path();
        let mut cfg = AppConfig::default();
        cfg.controller.log_level = "debug".to_string();
        cfg.simulation.enabled = false;

        // Act
        save_config_to(&cfg, &path).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_load_config_from_invalid_toml_is_parse_error() {
        let path = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
