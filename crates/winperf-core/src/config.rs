//! Collector configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! interval_secs = 300
//! idle_bound_secs = 3600
//! truncation = "accept"
//!
//! [ssh]
//! user = "monitor"
//!
//! [[devices]]
//! id = "sqlsrv02"
//! address = "10.0.0.5"
//!
//! [[devices.counters]]
//! counter = '\Memory\Available Bytes'
//! component = "os"
//! datasource = "memoryAvailableBytes"
//! ```
//!
//! Every top-level key is optional; see the `DEFAULT_*` constants.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::collector::{DeviceTarget, TruncationPolicy};

/// Polling interval per device.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;
/// How often idle devices are evicted.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;
/// Idle time after which a device entry is evicted.
pub const DEFAULT_IDLE_BOUND_SECS: u64 = 3600;
/// How often buffered results are published.
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 60;
/// Timeout for one remote command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// The file is not valid TOML or does not match the schema.
    Parse(toml::de::Error),
    /// The values are inconsistent.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "invalid config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// ssh client settings shared by all devices.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            user: None,
            port: None,
        }
    }
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_maintenance_interval() -> u64 {
    DEFAULT_MAINTENANCE_INTERVAL_SECS
}

fn default_idle_bound() -> u64 {
    DEFAULT_IDLE_BOUND_SECS
}

fn default_publish_interval() -> u64 {
    DEFAULT_PUBLISH_INTERVAL_SECS
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// Top-level collector configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_idle_bound")]
    pub idle_bound_secs: u64,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub truncation: TruncationPolicy,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub devices: Vec<DeviceTarget>,
}

impl Config {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates config text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("interval_secs", self.interval_secs),
            ("maintenance_interval_secs", self.maintenance_interval_secs),
            ("idle_bound_secs", self.idle_bound_secs),
            ("publish_interval_secs", self.publish_interval_secs),
            ("command_timeout_secs", self.command_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(ConfigError::Invalid("device id is empty".to_string()));
            }
            if device.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device {}: address is empty",
                    device.id
                )));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device id {}",
                    device.id
                )));
            }
            for binding in &device.counters {
                if binding.counter.trim().is_empty()
                    || binding.component.trim().is_empty()
                    || binding.datasource.trim().is_empty()
                {
                    return Err(ConfigError::Invalid(format!(
                        "device {}: counter bindings need counter, component and datasource",
                        device.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn idle_bound(&self) -> Duration {
        Duration::from_secs(self.idle_bound_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
interval_secs = 120
idle_bound_secs = 900
truncation = "discard"

[ssh]
user = "monitor"
port = 2222

[[devices]]
id = "sqlsrv02"
address = "10.0.0.5"

[[devices.counters]]
counter = '\Memory\Available Bytes'
component = "os"
datasource = "memoryAvailableBytes"

[[devices.counters]]
counter = '\Système\Temps d’activité système'
component = "os"
datasource = "sysUpTime"

[[devices]]
id = "web01"
address = "web01.example.net"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(120));
        assert_eq!(config.idle_bound(), Duration::from_secs(900));
        assert_eq!(config.maintenance_interval_secs, DEFAULT_MAINTENANCE_INTERVAL_SECS);
        assert_eq!(config.truncation, TruncationPolicy::Discard);
        assert_eq!(config.ssh.binary, "ssh");
        assert_eq!(config.ssh.user.as_deref(), Some("monitor"));
        assert_eq!(config.ssh.port, Some(2222));
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].counters.len(), 2);
        assert_eq!(
            config.devices[0].counters[1].counter,
            "\\Système\\Temps d\u{2019}activité système"
        );
        assert!(config.devices[1].counters.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
        assert_eq!(config.publish_interval_secs, DEFAULT_PUBLISH_INTERVAL_SECS);
        assert_eq!(config.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert_eq!(config.truncation, TruncationPolicy::Accept);
        assert_eq!(config.ssh, SshConfig::default());
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = Config::from_toml_str("interval_secs = 0").unwrap_err();
        assert_eq!(err.to_string(), "invalid config: interval_secs must be positive");
    }

    #[test]
    fn test_rejects_duplicate_device() {
        let text = r#"
[[devices]]
id = "a"
address = "10.0.0.1"

[[devices]]
id = "a"
address = "10.0.0.2"
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("duplicate device id a"));
    }

    #[test]
    fn test_rejects_empty_counter() {
        let text = r#"
[[devices]]
id = "a"
address = "10.0.0.1"
counters = [{ counter = "", component = "os", datasource = "x" }]
"#;
        assert!(matches!(
            Config::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_key() {
        assert!(matches!(
            Config::from_toml_str("intervall_secs = 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.devices[0].id, "sqlsrv02");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().starts_with("cannot read "));
    }
}
